//! In-process paged store with crash-atomic write transactions.
//!
//! This is the crate's view of the host's buffer manager. Reads are
//! snapshot copies taken under a short shared latch, the way every meta
//! and opaque read works on the scan path. Writes go through a
//! [`LogTxn`]: registering a page takes its exclusive latch and stages a
//! shadow image; mutations touch only the shadow; [`LogTxn::commit`]
//! publishes every image at once and releases the latches. Dropping the
//! transaction aborts it, leaving all pages untouched.
//!
//! Latches are never held across an `.await`; callers register pages in
//! meta-before-data, ascending-block order to stay deadlock free.

use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::page::layout::PageBuf;
use crate::page::{BlockNo, StorageError};

type PageGuard = ArcRwLockWriteGuard<RawRwLock, PageBuf>;

/// Default cap on relation size: 2^20 pages, 8 GiB.
pub const DEFAULT_MAX_PAGES: u32 = 1 << 20;

/// A relation's worth of pages.
pub struct PageStore {
    slots: RwLock<Vec<Arc<RwLock<PageBuf>>>>,
    extension: Mutex<()>,
    max_pages: u32,
}

impl PageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_pages(DEFAULT_MAX_PAGES)
    }

    #[must_use]
    pub fn with_max_pages(max_pages: u32) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            extension: Mutex::new(()),
            max_pages,
        }
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.slots.read().len() as u32
    }

    fn slot(&self, blk: BlockNo) -> Result<Arc<RwLock<PageBuf>>, StorageError> {
        let slots = self.slots.read();
        slots
            .get(blk as usize)
            .cloned()
            .ok_or(StorageError::MissingBlock {
                blk,
                pages: slots.len() as u32,
            })
    }

    /// Copy a page image under a shared latch.
    pub fn snapshot(&self, blk: BlockNo) -> Result<PageBuf, StorageError> {
        let slot = self.slot(blk)?;
        let page = slot.read();
        Ok(page.clone())
    }

    /// Start a crash-atomic page mutation group.
    #[must_use]
    pub fn begin(&self) -> LogTxn<'_> {
        LogTxn {
            store: self,
            entries: Vec::new(),
        }
    }
}

impl Default for PageStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a page registered in a [`LogTxn`].
#[derive(Clone, Copy, Debug)]
pub struct PageHandle(usize);

struct TxnEntry {
    blk: BlockNo,
    guard: PageGuard,
    image: PageBuf,
}

/// A group of page mutations applied atomically on [`commit`](Self::commit).
///
/// Mutations made through [`page_mut`](Self::page_mut) are staged on a
/// shadow image; until commit, readers observe the pre-transaction state.
pub struct LogTxn<'s> {
    store: &'s PageStore,
    entries: Vec<TxnEntry>,
}

impl LogTxn<'_> {
    /// Take the exclusive latch on `blk` and stage its image for mutation.
    pub fn register(&mut self, blk: BlockNo) -> Result<PageHandle, StorageError> {
        debug_assert!(
            self.entries.iter().all(|e| e.blk != blk),
            "page {blk} registered twice in one transaction"
        );
        let slot = self.store.slot(blk)?;
        let guard = RwLock::write_arc(&slot);
        let image = guard.clone();
        self.entries.push(TxnEntry { blk, guard, image });
        Ok(PageHandle(self.entries.len() - 1))
    }

    /// Allocate a new page under the relation extension lock and register
    /// it in this transaction.
    pub fn new_page(&mut self) -> Result<(BlockNo, PageHandle), StorageError> {
        let _extension = self.store.extension.lock();
        let blk = {
            let mut slots = self.store.slots.write();
            if slots.len() as u32 >= self.store.max_pages {
                return Err(StorageError::ResourceExhausted {
                    max_pages: self.store.max_pages,
                });
            }
            slots.push(Arc::new(RwLock::new(PageBuf::zeroed())));
            (slots.len() - 1) as BlockNo
        };
        let slot = self.store.slot(blk)?;
        let guard = RwLock::write_arc(&slot);
        self.entries.push(TxnEntry {
            blk,
            guard,
            image: PageBuf::zeroed(),
        });
        Ok((blk, PageHandle(self.entries.len() - 1)))
    }

    #[must_use]
    pub fn page(&self, handle: PageHandle) -> &PageBuf {
        &self.entries[handle.0].image
    }

    #[must_use]
    pub fn page_mut(&mut self, handle: PageHandle) -> &mut PageBuf {
        &mut self.entries[handle.0].image
    }

    #[must_use]
    pub fn block_of(&self, handle: PageHandle) -> BlockNo {
        self.entries[handle.0].blk
    }

    /// Publish every staged image and release the latches.
    pub fn commit(self) {
        for mut entry in self.entries {
            *entry.guard = entry.image;
        }
    }

    // Dropping without commit releases the latches with nothing written;
    // pages allocated by `new_page` stay zeroed and unreferenced, like
    // relation blocks orphaned by an aborted extension.
}
