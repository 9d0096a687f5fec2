//! Per-index advisory locks.
//!
//! Two named locks guard the write path. The **append lock** serializes
//! appenders; it is held only across page mutations, never across network
//! I/O, so it is a plain blocking mutex. The **flush lock** makes the
//! flusher exclusive; it is held across remote requests, so it is an
//! async mutex and is only ever try-acquired; a busy flusher means the
//! buffer is already being drained and the caller can move on.

/// The advisory lock pair for one index.
#[derive(Debug, Default)]
pub struct IndexLocks {
    append: parking_lot::Mutex<()>,
    flush: tokio::sync::Mutex<()>,
}

/// Guard of the append lock.
pub type AppendGuard<'a> = parking_lot::MutexGuard<'a, ()>;

/// Guard of the flush lock.
pub type FlushGuard<'a> = tokio::sync::MutexGuard<'a, ()>;

impl IndexLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until this caller is the only appender.
    pub fn append(&self) -> AppendGuard<'_> {
        self.append.lock()
    }

    /// Become the exclusive flusher, or return `None` when another flush
    /// is already in progress.
    pub fn try_flush(&self) -> Option<FlushGuard<'_>> {
        self.flush.try_lock().ok()
    }
}
