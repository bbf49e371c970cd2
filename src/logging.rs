// src/logging.rs
//
// Diagnostics sinks for the bridge engine.
//
// Every session is handed a sink at construction; nothing in the crate logs
// through process-wide state. `StderrSink` mirrors the desktop app's format:
// `HH:MM:SS.mmm [level] message` on stderr, optionally teed to a log file.

use std::fmt;
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Severity of a diagnostic message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(s)
    }
}

/// Destination for diagnostics emitted by a session.
pub trait DiagnosticSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Timestamped stderr logging with an optional log file.
pub struct StderrSink {
    min_level: Level,
    file: Mutex<Option<File>>,
}

impl StderrSink {
    pub fn new(min_level: Level) -> Self {
        Self {
            min_level,
            file: Mutex::new(None),
        }
    }

    /// Also write every message to a timestamped file in `log_dir`.
    ///
    /// Creates `YYYYmmdd-HHMMSS-mcpcan.log` and points an `mcpcan.log`
    /// symlink at it (Unix only). Returns the path of the new file.
    pub fn with_log_dir(self, log_dir: &Path) -> Result<(Self, PathBuf), String> {
        std::fs::create_dir_all(log_dir)
            .map_err(|e| format!("Failed to create log dir: {}", e))?;

        let filename = chrono::Local::now()
            .format("%Y%m%d-%H%M%S-mcpcan.log")
            .to_string();
        let log_path = log_dir.join(&filename);

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| format!("Failed to create log file: {}", e))?;

        #[cfg(unix)]
        {
            let symlink_path = log_dir.join("mcpcan.log");
            let _ = std::fs::remove_file(&symlink_path);
            if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
                eprintln!(
                    "{} [logging] Failed to create mcpcan.log symlink: {}",
                    timestamp(),
                    e
                );
            }
        }

        if let Ok(mut guard) = self.file.lock() {
            *guard = Some(file);
        }
        Ok((self, log_path))
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::new(Level::Info)
    }
}

impl DiagnosticSink for StderrSink {
    fn log(&self, level: Level, message: &str) {
        if level < self.min_level {
            return;
        }
        let line = format!("{} [{}] {}", timestamp(), level, message);
        eprintln!("{}", line);
        if let Ok(mut guard) = self.file.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", line);
            }
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Format and forward a message to a sink.
///
/// `tlog!(self.sink, Level::Debug, "sending: {}", cmd)`
macro_rules! tlog {
    ($sink:expr, $level:expr, $($arg:tt)*) => {{
        $sink.log($level, &format!($($arg)*));
    }};
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Arc;

    /// Collects messages so tests can assert on them.
    #[derive(Default)]
    pub(crate) struct MemorySink {
        pub(crate) lines: Mutex<Vec<(Level, String)>>,
    }

    impl MemorySink {
        pub(crate) fn shared() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn contains(&self, needle: &str) -> bool {
            self.lines
                .lock()
                .map(|l| l.iter().any(|(_, m)| m.contains(needle)))
                .unwrap_or(false)
        }
    }

    impl DiagnosticSink for MemorySink {
        fn log(&self, level: Level, message: &str) {
            if let Ok(mut lines) = self.lines.lock() {
                lines.push((level, message.to_string()));
            }
        }
    }
}
