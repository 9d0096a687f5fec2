//! Checkpoint FIFO state and its advance rules.
//!
//! The three checkpoints on the buffer meta page always satisfy
//! `ready ≤ flush ≤ latest`, both by checkpoint number and by preceding
//! tuple count. The advance operations here are the only code that moves
//! them; a caller handing in a regression is a programmer error and
//! panics rather than corrupting the FIFO. Violations discovered when
//! *reading* the meta page are reported as [`BufferError::Corruption`].

use miette::Diagnostic;
use thiserror::Error;

use crate::page::layout::{
    BUFFER_HEAD_BLKNO, BUFFER_META_BLKNO, BufferMeta, Checkpoint, StaticMeta,
};
use crate::page::store::PageStore;
use crate::page::{BlockNo, StorageError};

/// Errors raised by buffer state reads and writes.
#[derive(Debug, Error, Diagnostic)]
pub enum BufferError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    /// An invariant of the checkpoint FIFO does not hold on disk.
    #[error("buffer meta corruption: {what}")]
    #[diagnostic(
        code(remora::buffer::corruption),
        help("the index is damaged and needs to be rebuilt")
    )]
    Corruption { what: String },
}

impl BufferMeta {
    /// Buffer state of a freshly built index: every checkpoint at the
    /// initial position, the head page ready for inserts.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            ready: Checkpoint::initial(),
            flush: Checkpoint::initial(),
            latest: Checkpoint::initial(),
            insert_page: BUFFER_HEAD_BLKNO,
            n_tuples_since_last_checkpoint: 0,
        }
    }

    /// Total tuples ever appended to the buffer.
    #[must_use]
    pub fn total_tuples(&self) -> u64 {
        u64::from(self.latest.n_preceding_tuples)
            + u64::from(self.n_tuples_since_last_checkpoint)
    }

    /// Tuples not yet confirmed searchable on the remote service.
    #[must_use]
    pub fn unready_tuples(&self) -> u64 {
        self.total_tuples() - u64::from(self.ready.n_preceding_tuples)
    }

    /// Tuples not yet sent to the remote service.
    #[must_use]
    pub fn unflushed_tuples(&self) -> u64 {
        self.total_tuples() - u64::from(self.flush.n_preceding_tuples)
    }

    /// Check the monotone FIFO invariants, as read-side validation.
    pub fn validate(&self) -> Result<(), BufferError> {
        let ordered = |a: &Checkpoint, b: &Checkpoint| {
            a.checkpoint_no <= b.checkpoint_no && a.n_preceding_tuples <= b.n_preceding_tuples
        };
        if !ordered(&self.ready, &self.flush) {
            return Err(BufferError::Corruption {
                what: format!("ready ({}) is past flush ({})", self.ready, self.flush),
            });
        }
        if !ordered(&self.flush, &self.latest) {
            return Err(BufferError::Corruption {
                what: format!("flush ({}) is past latest ({})", self.flush, self.latest),
            });
        }
        if self.insert_page < BUFFER_HEAD_BLKNO {
            return Err(BufferError::Corruption {
                what: format!("insert page {} is not a buffer page", self.insert_page),
            });
        }
        Ok(())
    }

    /// Move `ready` forward to `checkpoint`.
    ///
    /// # Panics
    ///
    /// Panics unless `ready ≤ checkpoint ≤ flush`; the FIFO never accepts
    /// a regression.
    pub fn advance_ready(&mut self, checkpoint: &Checkpoint) {
        assert!(
            self.ready.checkpoint_no <= checkpoint.checkpoint_no
                && checkpoint.checkpoint_no <= self.flush.checkpoint_no,
            "advance_ready to {} violates ready {} <= c <= flush {}",
            checkpoint,
            self.ready,
            self.flush,
        );
        self.ready = *checkpoint;
    }

    /// Move `flush` forward to `checkpoint`.
    ///
    /// # Panics
    ///
    /// Panics unless `flush ≤ checkpoint ≤ latest`.
    pub fn advance_flush(&mut self, checkpoint: &Checkpoint) {
        assert!(
            self.flush.checkpoint_no <= checkpoint.checkpoint_no
                && checkpoint.checkpoint_no <= self.latest.checkpoint_no,
            "advance_flush to {} violates flush {} <= c <= latest {}",
            checkpoint,
            self.flush,
            self.latest,
        );
        self.flush = *checkpoint;
    }

    /// Demarcate a new latest checkpoint on `page`, represented by the
    /// tuple that completed the batch. `n_tuples_since_last_checkpoint`
    /// must already count that tuple; it resets to zero.
    pub fn create_checkpoint(&mut self, representative: crate::id::HeapRef, page: BlockNo) -> Checkpoint {
        let checkpoint = Checkpoint {
            checkpoint_no: self.latest.checkpoint_no + 1,
            page,
            representative,
            n_preceding_tuples: self.latest.n_preceding_tuples
                + self.n_tuples_since_last_checkpoint,
        };
        self.latest = checkpoint;
        self.n_tuples_since_last_checkpoint = 0;
        checkpoint
    }
}

impl std::fmt::Display for BufferMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ready: {}\nflush: {}\nlatest: {}\ninsert page: {}\nn_since_check: {}",
            self.ready,
            self.flush,
            self.latest,
            self.insert_page,
            self.n_tuples_since_last_checkpoint
        )
    }
}

/// Snapshot the buffer meta page and validate it.
pub fn snapshot_buffer_meta(store: &PageStore) -> Result<BufferMeta, BufferError> {
    let page = store.snapshot(BUFFER_META_BLKNO)?;
    let meta = BufferMeta::read_from(&page)?;
    meta.validate()?;
    Ok(meta)
}

/// Snapshot the static meta page.
pub fn snapshot_static_meta(store: &PageStore) -> Result<StaticMeta, BufferError> {
    let page = store.snapshot(crate::page::layout::STATIC_META_BLKNO)?;
    Ok(StaticMeta::read_from(&page)?)
}

/// Persist an advance of `ready` under the meta page's exclusive latch,
/// in its own log transaction.
///
/// A checkpoint another prober already passed is a no-op, not an error:
/// the decision was made on a snapshot and someone may have advanced
/// further since. A checkpoint past `flush` still panics.
pub fn advance_ready(store: &PageStore, checkpoint: &Checkpoint) -> Result<BufferMeta, BufferError> {
    let mut txn = store.begin();
    let handle = txn.register(BUFFER_META_BLKNO)?;
    let mut meta = BufferMeta::read_from(txn.page(handle))?;
    meta.validate()?;
    if checkpoint.checkpoint_no > meta.ready.checkpoint_no {
        meta.advance_ready(checkpoint);
        meta.write_to(txn.page_mut(handle));
        txn.commit();
    }
    Ok(meta)
}

/// Persist an advance of `flush`, same locking discipline as
/// [`advance_ready`].
pub fn advance_flush(store: &PageStore, checkpoint: &Checkpoint) -> Result<BufferMeta, BufferError> {
    let mut txn = store.begin();
    let handle = txn.register(BUFFER_META_BLKNO)?;
    let mut meta = BufferMeta::read_from(txn.page(handle))?;
    meta.validate()?;
    if checkpoint.checkpoint_no > meta.flush.checkpoint_no {
        meta.advance_flush(checkpoint);
        meta.write_to(txn.page_mut(handle));
        txn.commit();
    }
    Ok(meta)
}
