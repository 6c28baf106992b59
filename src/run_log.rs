//! Leveled messages collected during one generator run.
//!
//! Every message is also emitted through `tracing`; debug messages only go
//! there and are not collected.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub msg: String,
    pub level: LogLevel,
}

#[derive(Debug, Default)]
pub struct RunLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries_mut(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        // a poisoned log still holds valid entries
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, level: LogLevel, msg: String) {
        self.entries_mut().push(LogEntry { msg, level });
    }

    pub fn debug(&self, msg: impl Into<String>) {
        debug!("{}", msg.into());
    }

    pub fn info(&self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("{}", msg);
        self.push(LogLevel::Info, msg);
    }

    pub fn warning(&self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("{}", msg);
        self.push(LogLevel::Warning, msg);
    }

    pub fn error(&self, msg: impl Into<String>) {
        let msg = msg.into();
        error!("{}", msg);
        self.push(LogLevel::Error, msg);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries_mut().clone()
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn has_errors(&self) -> bool {
        self.entries_mut()
            .iter()
            .any(|entry| entry.level == LogLevel::Error)
    }

    /// Appends the entries of another log.
    pub fn absorb(&self, other: RunLog) {
        let entries = other.into_entries();
        self.entries_mut().extend(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn debug_messages_are_not_collected() {
        let log = RunLog::new();
        log.debug("raster fallback");
        log.info("Writing 'ogcConfig.json'");
        log.warning("no primary key");

        assert_eq!(
            serde_json::to_value(log.entries()).unwrap(),
            serde_json::json!([
                {"msg": "Writing 'ogcConfig.json'", "level": "info"},
                {"msg": "no primary key", "level": "warning"}
            ])
        );
        assert!(!log.has_errors());
    }

    #[test]
    fn absorb_keeps_order() {
        let log = RunLog::new();
        log.info("a");
        let other = RunLog::new();
        other.error("b");
        log.absorb(other);
        let msgs: Vec<_> = log.entries().into_iter().map(|e| e.msg).collect();
        assert_eq!(msgs, vec!["a", "b"]);
        assert!(log.has_errors());
    }
}
