//! Logger handle injected into every publishing component
//!
//! Events go to `tracing` like everywhere else; in addition the handle keeps
//! the lines at or above its capture level so the workflow can turn them into
//! a report once it reaches a terminal state.

use chrono::Utc;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use tracing::Level;

#[derive(Debug)]
struct LogInner {
    capture_level: Level,
    lines: Mutex<Vec<String>>,
}

/// Cloneable logger handle; clones share the captured lines
#[derive(Debug, Clone)]
pub struct PublishLog {
    inner: Arc<LogInner>,
}

impl Default for PublishLog {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl PublishLog {
    /// Create a handle capturing lines at `capture_level` and above
    pub fn new(capture_level: Level) -> Self {
        Self {
            inner: Arc::new(LogInner {
                capture_level,
                lines: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn debug(&self, message: impl Display) {
        let message = message.to_string();
        tracing::debug!("{}", message);
        self.capture(Level::DEBUG, message);
    }

    pub fn info(&self, message: impl Display) {
        let message = message.to_string();
        tracing::info!("{}", message);
        self.capture(Level::INFO, message);
    }

    pub fn warn(&self, message: impl Display) {
        let message = message.to_string();
        tracing::warn!("{}", message);
        self.capture(Level::WARN, message);
    }

    pub fn error(&self, message: impl Display) {
        let message = message.to_string();
        tracing::error!("{}", message);
        self.capture(Level::ERROR, message);
    }

    /// Snapshot of the captured lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        match self.inner.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn capture(&self, level: Level, message: String) {
        // tracing orders levels by verbosity: ERROR < WARN < INFO < DEBUG
        if level > self.inner.capture_level {
            return;
        }
        let line = format!(
            "{} {:<5} {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            message
        );
        match self.inner.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }
}
