//! Info loggers
//!
//! The engine reports human-readable lifecycle events (recovery, flushes,
//! compactions, file deletions) through a [`Logger`]. The default forwards
//! to `tracing`.

use std::fmt;

/// Sink for the engine's event log
pub trait Logger: Send + Sync {
    fn log(&self, message: &str);
}

/// Forwards every message to `tracing::info!`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!(target: "stratadb::info_log", "{}", message);
    }
}

/// Discards every message
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidLogger;

impl Logger for VoidLogger {
    fn log(&self, _message: &str) {}
}

/// Logger backed by a closure
pub struct FnLogger {
    sink: Box<dyn Fn(&str) + Send + Sync>,
}

impl FnLogger {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            sink: Box::new(sink),
        }
    }
}

impl fmt::Debug for FnLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnLogger")
    }
}

impl Logger for FnLogger {
    fn log(&self, message: &str) {
        (self.sink)(message)
    }
}
