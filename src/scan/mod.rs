//! The read path: remote query, local buffer scan, and the merged,
//! distance-ordered result stream.

pub mod bloom;
pub mod merger;
pub mod sort;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use bloom::BloomFilter;
pub use merger::{Scan, ScanHit, Scanner};
pub use sort::BoundedSort;

/// Cooperative cancellation for a running scan.
///
/// The local page walk checks the token between pages; a cancelled scan
/// stops with [`crate::error::IndexError::Cancelled`] without leaving any
/// latch held.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
