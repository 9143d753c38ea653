//! Pluggable diagnostic sink for the cache middleware.
//!
//! The library emits its own operational events through `tracing`. The cache
//! middleware additionally narrates every branch it takes to a [`LogSink`] so
//! that a service can route those lines somewhere else, or assert on them in
//! tests. The lines are advisory; nothing depends on them being delivered.

use std::sync::Arc;

use parking_lot::Mutex;

/// Receives one diagnostic line at a time. Must not block.
pub trait LogSink: Send + Sync {
    fn write(&self, line: &str);
}

/// Forwards lines to `tracing` at debug level under the `trustgate::cache` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, line: &str) {
        tracing::debug!(target: "trustgate::cache", "{line}");
    }
}

/// Keeps every line in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// `true` if any recorded line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, line: &str) {
        self.lines.lock().push(line.to_owned());
    }
}
