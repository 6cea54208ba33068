//! Cargo-style progress output for surfsync
//!
//! Displays cycle results in the familiar cargo format:
//! ```text
//!       Pushed notes.txt
//!     Conflict draft.md (remote version kept)
//!       Pulled data.bin
//!       Synced 3 files, 12 blocks (48.00 KiB) up, 4 blocks down in 210ms
//! ```

use std::io::Write as _;
use std::sync::OnceLock;
use std::time::Instant;

use surfsync_core::SyncReport;

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const PUSHED: &str = "Pushed";
    const DELETED: &str = "Deleted";
    const CONFLICT: &str = "Conflict";
    const PULLED: &str = "Pulled";
    const REMOVED: &str = "Removed";
    const SYNCED: &str = "Synced";
    const UP_TO_DATE: &str = "Up to date";
}

fn multi() -> &'static indicatif::MultiProgress {
    static MULTI: OnceLock<indicatif::MultiProgress> = OnceLock::new();
    MULTI.get_or_init(indicatif::MultiProgress::new)
}

/// Console log writer that suspends any active spinner while writing
pub struct ProgressWriter;

impl std::io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        multi().suspend(|| std::io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()
    }
}

/// Print a cargo-style status line
fn print_status(status: &str, message: &str) {
    print_styled(console::Style::new().green().bold(), status, message);
}

fn print_styled(style: console::Style, status: &str, message: &str) {
    multi().suspend(|| {
        let mut term = console::Term::stderr();
        let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
    });
}

/// Progress tracker for one sync cycle
pub struct SyncProgress {
    start: Instant,
    spinner: Option<indicatif::ProgressBar>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            spinner: None,
        }
    }

    /// Start the cycle spinner
    pub fn start(&mut self, root: &std::path::Path) {
        let pb = multi().add(indicatif::ProgressBar::new_spinner());
        pb.set_style(
            indicatif::ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg:>12} {prefix} {elapsed:.dim}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        pb.set_message("Syncing");
        pb.set_prefix(root.display().to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        self.spinner = Some(pb);
    }

    fn stop_spinner(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
            multi().remove(&pb);
        }
    }

    /// Print per-file lines and the final summary
    pub fn finish(&mut self, report: &SyncReport) {
        self.stop_spinner();

        for file in &report.pushed {
            print_status(Status::PUSHED, file);
        }
        for file in &report.tombstoned {
            print_status(Status::DELETED, file);
        }
        for file in &report.conflicts {
            print_styled(
                console::Style::new().yellow().bold(),
                Status::CONFLICT,
                &format!("{file} (remote version kept)"),
            );
        }
        for file in &report.pulled {
            print_status(Status::PULLED, file);
        }
        for file in &report.removed {
            print_status(Status::REMOVED, file);
        }

        let elapsed = self.elapsed_str();
        if report.is_noop() {
            print_status(Status::UP_TO_DATE, &format!("checked in {elapsed}"));
            return;
        }

        let files = report.pushed.len()
            + report.tombstoned.len()
            + report.pulled.len()
            + report.removed.len();
        print_status(
            Status::SYNCED,
            &format!(
                "{files} files, {} blocks ({}) up, {} blocks down in {elapsed}",
                report.blocks_uploaded,
                humansize::format_size(report.bytes_uploaded, humansize::BINARY),
                report.blocks_downloaded,
            ),
        );
    }

    /// Print a failed cycle
    pub fn failed(&mut self, error: &dyn std::fmt::Display) {
        self.stop_spinner();
        print_styled(
            console::Style::new().red().bold(),
            "Failed",
            &format!("{error} after {}", self.elapsed_str()),
        );
    }

    fn elapsed_str(&self) -> String {
        let elapsed = self.start.elapsed();
        if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        }
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}
