//! Appending tuple identifiers to the buffer tail.

use crate::buffer::locks::IndexLocks;
use crate::buffer::meta::BufferError;
use crate::config::Config;
use crate::id::HeapRef;
use crate::page::layout::{BUFFER_META_BLKNO, BufferMeta, BufferPageMut, BufferPageRef};
use crate::page::store::PageStore;

/// Writes `HeapRef`s to the buffer tail, creating a new page and possibly
/// a checkpoint when a batch boundary is crossed.
///
/// Appends are serialized by the per-index append lock; readers and the
/// flusher never take it. Each append is one log transaction covering the
/// buffer meta page, the tail page, and (on hand-off) the fresh page.
pub struct Appender<'a> {
    store: &'a PageStore,
    locks: &'a IndexLocks,
    batch_size: u32,
}

impl<'a> Appender<'a> {
    #[must_use]
    pub fn new(store: &'a PageStore, locks: &'a IndexLocks, config: &Config) -> Self {
        Self {
            store,
            locks,
            batch_size: config.batch_size(),
        }
    }

    /// Append one tuple identifier. Returns `true` when this append
    /// created a checkpoint, which is the caller's cue to trigger a
    /// flush.
    ///
    /// The caller is responsible for encoding the row first: zero-vector
    /// rejection happens at encode time, before anything reaches the
    /// buffer.
    pub fn append(&self, heap_ref: HeapRef) -> Result<bool, BufferError> {
        let _append = self.locks.append();

        /* Locking protocol for one append:
         * register buffer meta, then the tail page (meta before data,
         * ascending block order). In the common case the item lands on
         * the tail and only the since-checkpoint counter moves. On
         * overflow or a batch boundary, a fresh page is allocated inside
         * the same transaction, the item lands there, and the old tail
         * is linked to it; a batch boundary additionally stamps the
         * fresh page as a checkpoint page.
         */
        let mut txn = self.store.begin();
        let meta_handle = txn.register(BUFFER_META_BLKNO)?;
        let mut meta = BufferMeta::read_from(txn.page(meta_handle))?;
        meta.validate()?;

        let tail_handle = txn.register(meta.insert_page)?;
        let tail_full = BufferPageRef::new(txn.page(tail_handle)).is_full();

        // Count the incoming tuple; the batch boundary is crossed by the
        // append that brings the count to batch_size.
        meta.n_tuples_since_last_checkpoint += 1;
        let should_checkpoint = meta.n_tuples_since_last_checkpoint >= self.batch_size;

        if !tail_full && !should_checkpoint {
            let pushed = BufferPageMut::new(txn.page_mut(tail_handle)).push_item(heap_ref);
            debug_assert!(pushed, "non-full tail refused an item");
            meta.write_to(txn.page_mut(meta_handle));
            txn.commit();
            return Ok(false);
        }

        let (new_blk, new_handle) = txn.new_page()?;
        {
            let mut fresh = BufferPageMut::new(txn.page_mut(new_handle));
            fresh.init();
            let pushed = fresh.push_item(heap_ref);
            debug_assert!(pushed);
        }
        BufferPageMut::new(txn.page_mut(tail_handle)).set_next_page(new_blk);
        meta.insert_page = new_blk;

        if should_checkpoint {
            let prev_checkpoint_page = meta.latest.page;
            let checkpoint = meta.create_checkpoint(heap_ref, new_blk);
            BufferPageMut::new(txn.page_mut(new_handle))
                .set_checkpoint(checkpoint, prev_checkpoint_page);
            tracing::debug!(
                checkpoint = checkpoint.checkpoint_no,
                page = new_blk,
                representative = %heap_ref,
                "created buffer checkpoint"
            );
        }

        meta.write_to(txn.page_mut(meta_handle));
        txn.commit();
        Ok(should_checkpoint)
    }
}
