//! Binary protocol for surfsync store calls
//!
//! Wire format (all integers are big-endian):
//!
//! Request/Response frame:
//! ```text
//! +--------+--------+------------------+
//! | type   | length | payload          |
//! | 1 byte | 4 bytes| variable         |
//! +--------+--------+------------------+
//! ```
//!
//! Payload building blocks:
//! - hash: 32 raw bytes
//! - hash list: count:4, hash*count
//! - string: len:4, utf8
//! - block: size:4, data
//! - block ref: tag:1 (0 tombstone, 1 empty, 2 content + hash)
//! - file metadata: filename, version:8, count:4, block ref*count
//!
//! Message types:
//! - 0x01..0x04: block store requests
//! - 0x10..0x13: metadata store requests
//! - 0x80..: responses

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::block::{Block, BlockRef};
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::metadata::{BlockStoreMap, FileInfoMap, FileMetadata, UpdateOutcome};

/// Upper bound on a frame payload
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Frame header length: type + length
pub const HEADER_LEN: usize = 5;

/// Message type identifiers
pub mod msg {
    // Block store
    pub const GET_BLOCK: u8 = 0x01;
    pub const PUT_BLOCK: u8 = 0x02;
    pub const MISSING_BLOCKS: u8 = 0x03;
    pub const GET_ALL_BLOCK_HASHES: u8 = 0x04;
    // Metadata store
    pub const GET_FILE_INFO_MAP: u8 = 0x10;
    pub const UPDATE_FILE: u8 = 0x11;
    pub const GET_BLOCK_STORE_MAP: u8 = 0x12;
    pub const GET_BLOCK_STORE_ADDRS: u8 = 0x13;
    // Responses
    pub const BLOCK: u8 = 0x80;
    pub const NOT_FOUND: u8 = 0x81;
    pub const STORED: u8 = 0x82;
    pub const HASHES: u8 = 0x83;
    pub const FILE_INFO_MAP: u8 = 0x84;
    pub const UPDATE: u8 = 0x85;
    pub const BLOCK_STORE_MAP: u8 = 0x86;
    pub const ADDRS: u8 = 0x87;
    pub const ERROR: u8 = 0x8f;
}

const TAG_TOMBSTONE: u8 = 0;
const TAG_EMPTY: u8 = 1;
const TAG_CONTENT: u8 = 2;

const OUTCOME_ACCEPTED: u8 = 0;
const OUTCOME_CONFLICT: u8 = 1;

/// Call sent to a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetBlock(ContentHash),
    PutBlock(Block),
    MissingBlocks(Vec<ContentHash>),
    GetAllBlockHashes,
    GetFileInfoMap,
    UpdateFile(FileMetadata),
    GetBlockStoreMap(Vec<ContentHash>),
    GetBlockStoreAddrs,
}

/// Answer from a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Block(Block),
    NotFound(ContentHash),
    Stored(ContentHash),
    Hashes(Vec<ContentHash>),
    FileInfoMap(FileInfoMap),
    Update(UpdateOutcome),
    BlockStoreMap(BlockStoreMap),
    Addrs(Vec<String>),
    Error(String),
}

/// A message type plus its encoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Header followed by payload, ready to be written out
    ///
    /// # Errors
    /// Returns `Error::Protocol` if the payload exceeds `MAX_FRAME_LEN`
    pub fn to_bytes(&self) -> Result<Bytes> {
        let len = u32::try_from(self.payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "frame of {} bytes exceeds limit of {MAX_FRAME_LEN}",
                    self.payload.len()
                ))
            })?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.msg_type);
        buf.put_u32(len);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse a header into (type, payload length)
    ///
    /// # Errors
    /// Returns `Error::Protocol` if the length exceeds `MAX_FRAME_LEN`
    pub fn parse_header(header: [u8; HEADER_LEN]) -> Result<(u8, u32)> {
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        if len > MAX_FRAME_LEN {
            return Err(Error::Protocol(format!(
                "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
            )));
        }
        Ok((header[0], len))
    }
}

// ========== Encoding ==========

fn put_hash(buf: &mut BytesMut, hash: &ContentHash) {
    buf.put_slice(hash.as_bytes());
}

fn put_hashes(buf: &mut BytesMut, hashes: &[ContentHash]) {
    buf.put_u32(hashes.len() as u32);
    for hash in hashes {
        put_hash(buf, hash);
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_block(buf: &mut BytesMut, block: &Block) {
    buf.put_u32(block.size() as u32);
    buf.put_slice(&block.data);
}

fn put_metadata(buf: &mut BytesMut, meta: &FileMetadata) {
    put_string(buf, &meta.filename);
    buf.put_u64(meta.version);
    buf.put_u32(meta.blocks.len() as u32);
    for block in &meta.blocks {
        match block {
            BlockRef::Tombstone => buf.put_u8(TAG_TOMBSTONE),
            BlockRef::EmptyContent => buf.put_u8(TAG_EMPTY),
            BlockRef::Content(hash) => {
                buf.put_u8(TAG_CONTENT);
                put_hash(buf, hash);
            }
        }
    }
}

impl Request {
    #[must_use]
    pub fn encode(&self) -> Frame {
        let mut buf = BytesMut::new();
        let msg_type = match self {
            Self::GetBlock(hash) => {
                put_hash(&mut buf, hash);
                msg::GET_BLOCK
            }
            Self::PutBlock(block) => {
                put_block(&mut buf, block);
                msg::PUT_BLOCK
            }
            Self::MissingBlocks(hashes) => {
                put_hashes(&mut buf, hashes);
                msg::MISSING_BLOCKS
            }
            Self::GetAllBlockHashes => msg::GET_ALL_BLOCK_HASHES,
            Self::GetFileInfoMap => msg::GET_FILE_INFO_MAP,
            Self::UpdateFile(meta) => {
                put_metadata(&mut buf, meta);
                msg::UPDATE_FILE
            }
            Self::GetBlockStoreMap(hashes) => {
                put_hashes(&mut buf, hashes);
                msg::GET_BLOCK_STORE_MAP
            }
            Self::GetBlockStoreAddrs => msg::GET_BLOCK_STORE_ADDRS,
        };
        Frame {
            msg_type,
            payload: buf.freeze(),
        }
    }

    /// # Errors
    /// Returns `Error::Protocol` for unknown types or malformed payloads
    pub fn decode(frame: Frame) -> Result<Self> {
        let mut r = Reader(frame.payload);
        let request = match frame.msg_type {
            msg::GET_BLOCK => Self::GetBlock(r.hash()?),
            msg::PUT_BLOCK => Self::PutBlock(r.block()?),
            msg::MISSING_BLOCKS => Self::MissingBlocks(r.hashes()?),
            msg::GET_ALL_BLOCK_HASHES => Self::GetAllBlockHashes,
            msg::GET_FILE_INFO_MAP => Self::GetFileInfoMap,
            msg::UPDATE_FILE => Self::UpdateFile(r.metadata()?),
            msg::GET_BLOCK_STORE_MAP => Self::GetBlockStoreMap(r.hashes()?),
            msg::GET_BLOCK_STORE_ADDRS => Self::GetBlockStoreAddrs,
            other => {
                return Err(Error::Protocol(format!("unknown request type 0x{other:02x}")));
            }
        };
        r.finish()?;
        Ok(request)
    }
}

impl Response {
    #[must_use]
    pub fn encode(&self) -> Frame {
        let mut buf = BytesMut::new();
        let msg_type = match self {
            Self::Block(block) => {
                put_block(&mut buf, block);
                msg::BLOCK
            }
            Self::NotFound(hash) => {
                put_hash(&mut buf, hash);
                msg::NOT_FOUND
            }
            Self::Stored(hash) => {
                put_hash(&mut buf, hash);
                msg::STORED
            }
            Self::Hashes(hashes) => {
                put_hashes(&mut buf, hashes);
                msg::HASHES
            }
            Self::FileInfoMap(map) => {
                buf.put_u32(map.len() as u32);
                for meta in map.values() {
                    put_metadata(&mut buf, meta);
                }
                msg::FILE_INFO_MAP
            }
            Self::Update(outcome) => {
                match outcome {
                    UpdateOutcome::Accepted(version) => {
                        buf.put_u8(OUTCOME_ACCEPTED);
                        buf.put_u64(*version);
                    }
                    UpdateOutcome::Conflict => buf.put_u8(OUTCOME_CONFLICT),
                }
                msg::UPDATE
            }
            Self::BlockStoreMap(map) => {
                buf.put_u32(map.len() as u32);
                for (addr, hashes) in map {
                    put_string(&mut buf, addr);
                    put_hashes(&mut buf, hashes);
                }
                msg::BLOCK_STORE_MAP
            }
            Self::Addrs(addrs) => {
                buf.put_u32(addrs.len() as u32);
                for addr in addrs {
                    put_string(&mut buf, addr);
                }
                msg::ADDRS
            }
            Self::Error(message) => {
                put_string(&mut buf, message);
                msg::ERROR
            }
        };
        Frame {
            msg_type,
            payload: buf.freeze(),
        }
    }

    /// # Errors
    /// Returns `Error::Protocol` for unknown types or malformed payloads
    pub fn decode(frame: Frame) -> Result<Self> {
        let mut r = Reader(frame.payload);
        let response = match frame.msg_type {
            msg::BLOCK => Self::Block(r.block()?),
            msg::NOT_FOUND => Self::NotFound(r.hash()?),
            msg::STORED => Self::Stored(r.hash()?),
            msg::HASHES => Self::Hashes(r.hashes()?),
            msg::FILE_INFO_MAP => {
                let count = r.u32()?;
                let mut map = FileInfoMap::new();
                for _ in 0..count {
                    let meta = r.metadata()?;
                    map.insert(meta.filename.clone(), meta);
                }
                Self::FileInfoMap(map)
            }
            msg::UPDATE => match r.u8()? {
                OUTCOME_ACCEPTED => Self::Update(UpdateOutcome::Accepted(r.u64()?)),
                OUTCOME_CONFLICT => Self::Update(UpdateOutcome::Conflict),
                other => return Err(Error::Protocol(format!("unknown update outcome {other}"))),
            },
            msg::BLOCK_STORE_MAP => {
                let count = r.u32()?;
                let mut map = BlockStoreMap::new();
                for _ in 0..count {
                    let addr = r.string()?;
                    map.insert(addr, r.hashes()?);
                }
                Self::BlockStoreMap(map)
            }
            msg::ADDRS => {
                let count = r.u32()?;
                let addrs = (0..count).map(|_| r.string()).collect::<Result<_>>()?;
                Self::Addrs(addrs)
            }
            msg::ERROR => Self::Error(r.string()?),
            other => {
                return Err(Error::Protocol(format!("unknown response type 0x{other:02x}")));
            }
        };
        r.finish()?;
        Ok(response)
    }
}

// ========== Decoding ==========

/// Bounds-checked cursor over a payload
struct Reader(Bytes);

impl Reader {
    fn need(&self, n: usize) -> Result<()> {
        if self.0.remaining() < n {
            return Err(Error::Protocol(format!(
                "truncated payload: need {n} bytes, have {}",
                self.0.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.0.get_u8())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.0.get_u32())
    }

    fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.0.get_u64())
    }

    fn take(&mut self, n: usize) -> Result<Bytes> {
        self.need(n)?;
        Ok(self.0.split_to(n))
    }

    fn hash(&mut self) -> Result<ContentHash> {
        let raw = self.take(32)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        Ok(ContentHash::from_raw(bytes))
    }

    fn hashes(&mut self) -> Result<Vec<ContentHash>> {
        let count = self.u32()? as usize;
        self.need(count.saturating_mul(32))?;
        (0..count).map(|_| self.hash()).collect()
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|e| Error::Protocol(format!("invalid utf-8: {e}")))
    }

    fn block(&mut self) -> Result<Block> {
        let size = self.u32()? as usize;
        Ok(Block::new(self.take(size)?))
    }

    fn metadata(&mut self) -> Result<FileMetadata> {
        let filename = self.string()?;
        let version = self.u64()?;
        let count = self.u32()? as usize;
        self.need(count)?;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let block = match self.u8()? {
                TAG_TOMBSTONE => BlockRef::Tombstone,
                TAG_EMPTY => BlockRef::EmptyContent,
                TAG_CONTENT => BlockRef::Content(self.hash()?),
                other => return Err(Error::Protocol(format!("unknown block ref tag {other}"))),
            };
            blocks.push(block);
        }
        Ok(FileMetadata::new(filename, version, blocks))
    }

    fn finish(&self) -> Result<()> {
        if self.0.has_remaining() {
            return Err(Error::Protocol(format!(
                "{} trailing bytes in payload",
                self.0.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> FileMetadata {
        FileMetadata::new(
            "f.txt",
            7,
            vec![
                BlockRef::Content(ContentHash::from_bytes(b"one")),
                BlockRef::Content(ContentHash::from_bytes(b"two")),
            ],
        )
    }

    #[test]
    fn test_update_file_request() {
        let request = Request::UpdateFile(sample_meta());
        let frame = request.encode();
        assert_eq!(frame.msg_type, msg::UPDATE_FILE);
        assert_eq!(Request::decode(frame).unwrap(), request);
    }

    #[test]
    fn test_markers_survive_the_wire() {
        for meta in [
            FileMetadata::tombstone("gone.txt", 4),
            FileMetadata::new("empty.txt", 1, vec![BlockRef::EmptyContent]),
        ] {
            let request = Request::UpdateFile(meta.clone());
            assert_eq!(
                Request::decode(request.encode()).unwrap(),
                Request::UpdateFile(meta)
            );
        }
    }

    #[test]
    fn test_block_store_map_keeps_empty_shards() {
        let mut map = BlockStoreMap::new();
        map.insert("a:1".into(), vec![ContentHash::from_bytes(b"x")]);
        map.insert("b:1".into(), Vec::new());

        let decoded = Response::decode(Response::BlockStoreMap(map.clone()).encode()).unwrap();
        assert_eq!(decoded, Response::BlockStoreMap(map));
    }

    #[test]
    fn test_conflict_outcome() {
        let frame = Response::Update(UpdateOutcome::Conflict).encode();
        assert_eq!(frame.payload.len(), 1);
        assert_eq!(
            Response::decode(frame).unwrap(),
            Response::Update(UpdateOutcome::Conflict)
        );
    }

    #[test]
    fn test_frame_bytes_layout() {
        let frame = Request::GetBlock(ContentHash::from_bytes(b"x")).encode();
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 32);
        assert_eq!(bytes[0], msg::GET_BLOCK);
        assert_eq!(&bytes[1..5], &32u32.to_be_bytes());

        let header: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().unwrap();
        assert_eq!(Frame::parse_header(header).unwrap(), (msg::GET_BLOCK, 32));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut header = [0u8; HEADER_LEN];
        header[0] = msg::PUT_BLOCK;
        header[1..].copy_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        assert!(matches!(Frame::parse_header(header), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_oversized_payload_not_written() {
        let frame = Frame {
            msg_type: msg::PUT_BLOCK,
            payload: Bytes::from(vec![0u8; MAX_FRAME_LEN as usize + 1]),
        };
        assert!(matches!(frame.to_bytes(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_long_error_message_survives_the_wire() {
        let message = "e".repeat(usize::from(u16::MAX) + 10);
        let frame = Response::Error(message.clone()).encode();
        assert_eq!(frame.payload.len(), 4 + message.len());
        assert_eq!(Response::decode(frame).unwrap(), Response::Error(message));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut frame = Request::MissingBlocks(vec![ContentHash::from_bytes(b"x")]).encode();
        frame.payload = frame.payload.slice(..frame.payload.len() - 1);
        assert!(matches!(Request::decode(frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let frame = Frame {
            msg_type: msg::GET_FILE_INFO_MAP,
            payload: Bytes::from_static(b"junk"),
        };
        assert!(matches!(Request::decode(frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let frame = Frame {
            msg_type: 0x7f,
            payload: Bytes::new(),
        };
        assert!(Request::decode(frame.clone()).is_err());
        assert!(Response::decode(frame).is_err());
    }
}
