// ABOUTME: Append-only record of system failures
// ABOUTME: Shared by the reactor and streaming workers

use parking_lot::Mutex;
use std::error::Error as StdError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Error sink for failures that are not the client's fault.
///
/// Each record holds the input that triggered the failure, the error and its
/// source chain, followed by a blank line.
#[derive(Debug)]
pub struct ErrorLog {
    path: Option<PathBuf>,
    /// Serialises appends from concurrent workers
    write_lock: Mutex<()>,
}

impl ErrorLog {
    /// Log to a file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Mutex::new(()),
        }
    }

    /// Only emit log records, never touch the filesystem
    pub fn disabled() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Record a failure together with the input that caused it
    pub fn record(&self, context: &str, error: &dyn StdError) {
        log::error!("{}: {}", context, error);

        let Some(path) = &self.path else {
            return;
        };

        let mut entry = format!("{}\n{}\n", context, error);
        let mut source = error.source();
        while let Some(cause) = source {
            entry.push_str(&format!("caused by: {}\n", cause));
            source = cause.source();
        }
        entry.push('\n');

        let _guard = self.write_lock.lock();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(entry.as_bytes()));

        if let Err(e) = result {
            log::error!("Failed to write error log {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandError;
    use std::io;

    #[test]
    fn test_record_appends_context_and_chain() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("errors.txt");
        let log = ErrorLog::new(&path);

        let error = CommandError::Storage(io::Error::new(io::ErrorKind::Other, "disk full"));
        log.record("2 play Redbone", &error);
        log.record("3 stop", &error);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("2 play Redbone\nStorage failure: disk full\n"));
        assert!(contents.contains("caused by: disk full"));
        assert_eq!(contents.matches("Storage failure").count(), 2);
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let log = ErrorLog::disabled();
        log.record("0 login", &io::Error::new(io::ErrorKind::Other, "boom"));
    }
}
