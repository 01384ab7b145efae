//! Log sinks and subscriber setup.
//!
//! The polling core writes severity-tagged lines through [`LogSink`]. In the
//! running service that sink is [`TracingSink`], and the installed
//! `tracing-subscriber` stack decides where the lines end up: stderr, an
//! append-only file, or the Windows Application event log.

use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log target used for every line emitted through [`TracingSink`].
pub const LOG_TARGET: &str = "mic_volume_service";

/// Event source name registered with the Windows event log.
pub const EVENT_SOURCE: &str = "MicrophoneVolumeService";

/// Default log file used by the installed service.
pub const DEFAULT_LOG_FILE: &str = r"C:\Windows\Temp\MicrophoneVolumeService.log";

/// Line severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Destination for severity-tagged text lines.
///
/// Implementations are best effort: they never panic and never report I/O
/// failures back to the caller.
pub trait LogSink: Send + Sync {
    fn write(&self, severity: Severity, message: &str);

    fn info(&self, message: &str) {
        self.write(Severity::Info, message);
    }

    fn warning(&self, message: &str) {
        self.write(Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.write(Severity::Error, message);
    }
}

/// Forwards lines to the global `tracing` dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(target: LOG_TARGET, "{message}"),
            Severity::Warning => tracing::warn!(target: LOG_TARGET, "{message}"),
            Severity::Error => tracing::error!(target: LOG_TARGET, "{message}"),
        }
    }
}

/// Records lines in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded lines in order.
    pub fn lines(&self) -> Vec<(Severity, String)> {
        self.lines.lock().clone()
    }

    /// Recorded messages without severities.
    pub fn messages(&self) -> Vec<String> {
        self.lines.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Number of recorded lines containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|(_, m)| m.contains(needle))
            .count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.count_containing(needle) > 0
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl LogSink for MemorySink {
    fn write(&self, severity: Severity, message: &str) {
        self.lines.lock().push((severity, message.to_string()));
    }
}

/// Where log output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// stderr, used by foreground mode
    Console,

    /// Append to a text file
    File(PathBuf),

    /// Windows Application event log
    EventLog,
}

impl std::fmt::Display for LogDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogDestination::Console => write!(f, "console"),
            LogDestination::File(path) => write!(f, "file {}", path.display()),
            LogDestination::EventLog => write!(f, "event log ({EVENT_SOURCE})"),
        }
    }
}

/// `RUST_LOG` filter, defaulting to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Subscriber appending plain-text lines to `path`.
pub fn file_subscriber(
    path: &Path,
    filter: EnvFilter,
) -> io::Result<impl Subscriber + Send + Sync + 'static> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    Ok(tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_target(false),
    ))
}

fn init_console() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(io::stderr))
        .try_init();
}

/// Install the global subscriber for `destination`.
///
/// Falls back to stderr when the destination cannot be opened. Calling it
/// again after a subscriber is installed has no effect.
pub fn init(destination: &LogDestination) {
    match destination {
        LogDestination::Console => init_console(),
        LogDestination::File(path) => match file_subscriber(path, env_filter()) {
            Ok(subscriber) => {
                let _ = subscriber.try_init();
            }
            Err(e) => {
                init_console();
                tracing::warn!("cannot open log file {}: {e}; logging to stderr", path.display());
            }
        },
        LogDestination::EventLog => init_event_log(),
    }
}

#[cfg(windows)]
fn init_event_log() {
    match crate::platform::eventlog::EventLogLayer::register(EVENT_SOURCE) {
        Ok(layer) => {
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(layer)
                .try_init();
        }
        Err(e) => {
            init_console();
            tracing::warn!("cannot register event source {EVENT_SOURCE}: {e}; logging to stderr");
        }
    }
}

#[cfg(not(windows))]
fn init_event_log() {
    init_console();
    tracing::warn!("the event log is only available on Windows; logging to stderr");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.info("first");
        sink.warning("second");
        sink.error("third first");

        assert_eq!(
            sink.lines(),
            vec![
                (Severity::Info, "first".to_string()),
                (Severity::Warning, "second".to_string()),
                (Severity::Error, "third first".to_string()),
            ]
        );
        assert_eq!(sink.count_containing("first"), 2);
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_file_subscriber_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.log");
        std::fs::write(&path, "existing line\n").unwrap();

        let subscriber = file_subscriber(&path, EnvFilter::new("info")).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            TracingSink.info("Volume set to 100% for: USB Mic");
            TracingSink.error("Volume setting error for USB Mic");
            tracing::debug!("filtered out");
        });

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("existing line\n"));
        assert!(content.contains("Volume set to 100% for: USB Mic"));
        assert!(content.contains("ERROR"));
        assert!(!content.contains("filtered out"));
        assert!(!content.contains('\u{1b}'));
    }

    #[test]
    fn test_file_subscriber_reports_unopenable_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        assert!(file_subscriber(dir.path(), EnvFilter::new("info")).is_err());
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(LogDestination::Console.to_string(), "console");
        assert_eq!(
            LogDestination::EventLog.to_string(),
            "event log (MicrophoneVolumeService)"
        );
    }
}
