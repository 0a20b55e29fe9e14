//! Log sink the store reports failures to.

use std::error::Error as StdError;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERR",
        }
    }
}

/// Accepts `(level, message, subject, error)`. Implementations must not panic; the store
/// calls this on every failed operation and never looks at the outcome.
pub trait ListingLogger: Send + Sync {
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        subject: Option<&str>,
        error: Option<&(dyn StdError + 'static)>,
    );
}

/// Forwards to `tracing` events with `subject` and `error` fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ListingLogger for TracingLogger {
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        subject: Option<&str>,
        error: Option<&(dyn StdError + 'static)>,
    ) {
        let subject = subject.unwrap_or("-");
        let error = error.map(|e| e.to_string()).unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(subject, error = %error, "{message}"),
            LogLevel::Info => tracing::info!(subject, error = %error, "{message}"),
            LogLevel::Warn => tracing::warn!(subject, error = %error, "{message}"),
            LogLevel::Error => tracing::error!(subject, error = %error, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub subject: Option<String>,
    pub error: Option<String>,
}

/// Keeps every entry in memory; used by tests and by callers that want to inspect failures.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn entries_for(&self, subject: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.subject.as_deref() == Some(subject))
            .collect()
    }
}

impl ListingLogger for MemoryLogger {
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        subject: Option<&str>,
        error: Option<&(dyn StdError + 'static)>,
    ) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                level,
                message: message.to_string(),
                subject: subject.map(str::to_string),
                error: error.map(|e| e.to_string()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_logger_records_subject_and_error() {
        let logger = MemoryLogger::new();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        logger.log(LogLevel::Error, "Error adding image 'a.jpg'", Some("X1"), Some(&err));
        logger.log(LogLevel::Info, "queue empty", None, None);

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].subject.as_deref(), Some("X1"));
        assert_eq!(entries[0].error.as_deref(), Some("disk gone"));
        assert_eq!(entries[1].error, None);
        assert_eq!(logger.entries_for("X1").len(), 1);
    }

    #[test]
    fn tracing_logger_accepts_every_level_without_subscriber() {
        let logger = TracingLogger;
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            logger.log(level, "message", None, None);
        }
        assert_eq!(LogLevel::Error.as_str(), "ERR");
    }
}
