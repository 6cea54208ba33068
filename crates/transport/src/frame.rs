//! Async frame IO over any byte stream

use surfsync_core::protocol::{Frame, HEADER_LEN};
use surfsync_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one frame; `None` on a clean EOF before the header
///
/// # Errors
/// Returns `Error::Io` on read failure or a truncated frame, and
/// `Error::Protocol` for an oversized length.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    }

    let (msg_type, len) = Frame::parse_header(header)?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Some(Frame {
        msg_type,
        payload: payload.into(),
    }))
}

/// Write one frame and flush
///
/// # Errors
/// Returns `Error::Protocol` for a payload over the frame limit, without
/// writing anything, and `Error::Io` on write failure.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let bytes = frame.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use surfsync_core::protocol::MAX_FRAME_LEN;
    use surfsync_core::{ContentHash, Request};

    #[tokio::test]
    async fn test_frames_in_sequence() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let first = Request::GetBlock(ContentHash::from_bytes(b"a")).encode();
        let second = Request::GetFileInfoMap.encode();
        write_frame(&mut client, &first).await.unwrap();
        write_frame(&mut client, &second).await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap(), Some(first));
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(second));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x01, 0, 0, 0, 32, 1, 2, 3]).await.unwrap();
        drop(client);

        assert!(matches!(read_frame(&mut server).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_never_hits_the_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let frame = Frame {
            msg_type: 0x02,
            payload: vec![0u8; MAX_FRAME_LEN as usize + 1].into(),
        };

        assert!(matches!(
            write_frame(&mut client, &frame).await,
            Err(Error::Protocol(_))
        ));
        drop(client);
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = vec![0x02];
        header.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        client.write_all(&header).await.unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(Error::Protocol(_))
        ));
    }
}
