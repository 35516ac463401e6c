use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::time::{LocalTime, UtcTime};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::config_directory;

const LOG_FILE_NAME: &str = "fileup.log";
const FILTER_VARIABLE: &str = "FILEUP_LOG";
const DEFAULT_FILTER: &str = "info";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingDestination {
    /// JSON records in the log file plus readable lines on stderr.
    FileAndStderr,
    /// Log file only; stderr belongs to the prompts.
    FileOnly,
    StderrOnly,
}

impl LoggingDestination {
    fn writes_file(self) -> bool {
        !matches!(self, Self::StderrOnly)
    }

    fn writes_stderr(self) -> bool {
        !matches!(self, Self::FileOnly)
    }
}

/// Keeps the background file writer alive for the rest of the process.
#[derive(Debug)]
struct ActiveLogging {
    _writer: Option<WorkerGuard>,
    file: Option<PathBuf>,
}

static ACTIVE: OnceLock<ActiveLogging> = OnceLock::new();

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot create the log directory: {0}")]
    Io(#[from] io::Error),
    #[error("bad {FILTER_VARIABLE} filter: {0}")]
    Filter(#[from] ParseError),
    #[error("a global subscriber is already installed: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global subscriber once and returns the log file in use, if any.
/// Later calls keep the first destination.
pub fn init_logging(destination: LoggingDestination) -> Result<Option<&'static Path>, LoggingError> {
    if ACTIVE.get().is_none() {
        let active = install(destination)?;
        // A concurrent caller may have won; its subscriber is the one in place.
        let _ = ACTIVE.set(active);
    }
    Ok(ACTIVE.get().and_then(|active| active.file.as_deref()))
}

fn install(destination: LoggingDestination) -> Result<ActiveLogging, LoggingError> {
    let filter = filter_from(env::var(FILTER_VARIABLE).ok(), env::var(EnvFilter::DEFAULT_ENV).ok())?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut writer = None;
    let mut file = None;

    if destination.writes_file() {
        let dir = config_directory().join("logs");
        fs::create_dir_all(&dir)?;
        let (layer, guard) = json_file_layer(&dir);
        layers.push(layer);
        writer = Some(guard);
        file = Some(dir.join(LOG_FILE_NAME));
    }
    if destination.writes_stderr() {
        layers.push(stderr_layer());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;

    if let Some(path) = &file {
        info!(path = %path.display(), "Structured logging enabled");
    }
    Ok(ActiveLogging {
        _writer: writer,
        file,
    })
}

fn json_file_layer(dir: &Path) -> (BoxedLayer, WorkerGuard) {
    let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = tracing_subscriber::fmt::layer()
        .event_format(
            tracing_subscriber::fmt::format()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with_writer(writer)
        .with_ansi(false)
        .boxed();
    (layer, guard)
}

fn stderr_layer() -> BoxedLayer {
    tracing_subscriber::fmt::layer()
        .event_format(
            tracing_subscriber::fmt::format()
                .with_timer(LocalTime::rfc_3339())
                .with_target(false)
                .with_ansi(false),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .boxed()
}

/// `FILEUP_LOG` wins over `RUST_LOG`; blank or missing values mean `info`.
/// An unparsable `RUST_LOG` is ignored, an unparsable `FILEUP_LOG` is an error.
fn filter_from(own: Option<String>, rust_log: Option<String>) -> Result<EnvFilter, ParseError> {
    let own = own.filter(|spec| !spec.trim().is_empty());
    if let Some(spec) = own {
        return EnvFilter::try_new(spec);
    }
    rust_log
        .filter(|spec| !spec.trim().is_empty())
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .map_or_else(|| EnvFilter::try_new(DEFAULT_FILTER), Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_variable_takes_precedence() {
        let filter = filter_from(Some("fileup_core=debug".into()), Some("warn".into())).expect("filter");
        assert_eq!(filter.to_string(), "fileup_core=debug");
    }

    #[test]
    fn blank_values_fall_back_to_info() {
        let filter = filter_from(Some("  ".into()), None).expect("filter");
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn broken_rust_log_is_ignored() {
        let filter = filter_from(None, Some("=[".into())).expect("filter");
        assert_eq!(filter.to_string(), "info");
        assert!(filter_from(Some("=[".into()), None).is_err());
    }

    #[test]
    fn destinations_pick_their_sinks() {
        assert!(LoggingDestination::FileOnly.writes_file());
        assert!(!LoggingDestination::FileOnly.writes_stderr());
        assert!(!LoggingDestination::StderrOnly.writes_file());
        assert!(LoggingDestination::FileAndStderr.writes_stderr());
    }
}
