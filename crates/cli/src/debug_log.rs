//! Per-run trace log for the surfsync client
//!
//! Each invocation writes every push, pull and store call to
//! `<tmp>/surfsync-<run id>.log`, independent of the console verbosity.
//! Console lines go through the progress writer so they never tear the
//! cycle spinner.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer as _;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::progress;

/// Crates traced into the run log when `RUST_LOG` is unset
const RUN_LOG_DIRECTIVES: &str = "warn,surfsync=trace,surfsync_core=trace,surfsync_transport=trace";

/// Handle to the run log; dropping it flushes buffered lines to disk
pub struct RunLog {
    pub path: PathBuf,
    _flush: tracing_appender::non_blocking::WorkerGuard,
}

fn console_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

fn run_log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(RUN_LOG_DIRECTIVES))
}

/// Install the global subscriber. Keep the returned handle until exit.
pub fn init(verbose: bool) -> RunLog {
    let file_name = format!("surfsync-{}.log", uuid::Uuid::new_v4());
    let dir = std::env::temp_dir();
    let path = dir.join(&file_name);

    let (writer, flush) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &file_name));

    let run_log = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT);

    let console = tracing_subscriber::fmt::layer()
        .with_writer(|| progress::ProgressWriter)
        .with_target(false)
        .with_filter(console_level(verbose));

    tracing_subscriber::registry()
        .with(run_log_filter())
        .with(run_log)
        .with(console)
        .init();

    RunLog {
        path,
        _flush: flush,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_lowers_console_level() {
        assert_eq!(console_level(false), LevelFilter::INFO);
        assert_eq!(console_level(true), LevelFilter::DEBUG);
    }

    #[test]
    fn test_run_log_directives_parse() {
        let filter = EnvFilter::try_new(RUN_LOG_DIRECTIVES).unwrap();
        assert!(filter.to_string().contains("surfsync_core=trace"));
    }
}
