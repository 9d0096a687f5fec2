//! On-disk page format.
//!
//! All integers are little-endian. A buffer page is laid out as
//!
//! ```text
//! +--------------+------------------------------+------------------+
//! | header (8 B) | items, 8 B each, packed      | opaque (32 B)    |
//! |  n_items u16 | HeapRef{block u32, off u16}  | next_page    u32 |
//! |  (padding)   |                              | prev_ckpt    u32 |
//! |              |                              | checkpoint  24 B |
//! +--------------+------------------------------+------------------+
//! ```
//!
//! Fixed-size items give a deterministic per-page capacity, which the
//! flusher relies on when walking checkpoint intervals.

use crate::id::{HEAP_REF_SIZE, HeapRef};
use crate::page::{BlockNo, StorageError};
use crate::vector::Metric;

/// Size of every page image.
pub const PAGE_SIZE: usize = 8192;

/// Block 0: immutable index description.
pub const STATIC_META_BLKNO: BlockNo = 0;
/// Block 1: mutable buffer state.
pub const BUFFER_META_BLKNO: BlockNo = 1;
/// Block 2: first buffer page, head of the chain.
pub const BUFFER_HEAD_BLKNO: BlockNo = 2;

/// On-disk encoding of "no block".
const NO_BLOCK: u32 = u32::MAX;

const PAGE_HEADER_SIZE: usize = 8;
const OPAQUE_SIZE: usize = 32;
const CHECKPOINT_SIZE: usize = 24;
const OPAQUE_OFFSET: usize = PAGE_SIZE - OPAQUE_SIZE;

/// Buffer tuples that fit on one page.
pub const PAGE_CAPACITY: u16 =
    ((PAGE_SIZE - PAGE_HEADER_SIZE - OPAQUE_SIZE) / HEAP_REF_SIZE) as u16;

const HOST_MAX: usize = 100;
const INDEX_NAME_MAX: usize = 45;

/// A raw page image. Cloned freely: snapshot reads and shadow writes both
/// work on copies.
#[derive(Clone)]
pub struct PageBuf(Box<[u8; PAGE_SIZE]>);

impl PageBuf {
    #[must_use]
    pub fn zeroed() -> Self {
        Self(Box::new([0u8; PAGE_SIZE]))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.0
    }
}

impl Default for PageBuf {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl std::fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuf").finish_non_exhaustive()
    }
}

/// What a block number means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    StaticMeta,
    BufferMeta,
    Buffer,
}

impl PageKind {
    #[must_use]
    pub fn of_block(blk: BlockNo) -> Self {
        match blk {
            STATIC_META_BLKNO => PageKind::StaticMeta,
            BUFFER_META_BLKNO => PageKind::BufferMeta,
            _ => PageKind::Buffer,
        }
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_block(bytes: &[u8], offset: usize) -> Option<BlockNo> {
    match read_u32(bytes, offset) {
        NO_BLOCK => None,
        blk => Some(blk),
    }
}

fn write_block(bytes: &mut [u8], offset: usize, blk: Option<BlockNo>) {
    write_u32(bytes, offset, blk.unwrap_or(NO_BLOCK));
}

/// A position in the checkpoint FIFO.
///
/// `checkpoint_no` 0 is the implicit initial checkpoint sitting at the
/// buffer head; it has no representative tuple. Every later checkpoint is
/// represented by the tuple whose append created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub checkpoint_no: u32,
    pub page: BlockNo,
    pub representative: HeapRef,
    pub n_preceding_tuples: u32,
}

impl Checkpoint {
    /// The initial checkpoint: position zero at the buffer head.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            checkpoint_no: 0,
            page: BUFFER_HEAD_BLKNO,
            representative: HeapRef::default(),
            n_preceding_tuples: 0,
        }
    }

    /// Remote vector id of the representative tuple, if there is one.
    #[must_use]
    pub fn representative_id(&self) -> Option<String> {
        (self.checkpoint_no > 0).then(|| self.representative.vector_id())
    }

    fn write_to(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.checkpoint_no);
        write_u32(bytes, 4, self.page);
        bytes[8..16].copy_from_slice(&self.representative.to_bytes());
        write_u32(bytes, 16, self.n_preceding_tuples);
        bytes[20] = 1;
    }

    fn read_from(bytes: &[u8]) -> Option<Self> {
        if bytes[20] == 0 {
            return None;
        }
        Some(Self {
            checkpoint_no: read_u32(bytes, 0),
            page: read_u32(bytes, 4),
            representative: HeapRef::from_bytes(&bytes[8..16].try_into().unwrap()),
            n_preceding_tuples: read_u32(bytes, 16),
        })
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{}, blk {}, tid {}, n_prec {}",
            self.checkpoint_no, self.page, self.representative, self.n_preceding_tuples
        )
    }
}

/// Immutable index description, block 0. Written once at build time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticMeta {
    pub dimensions: u32,
    pub metric: Metric,
    pub host: String,
    pub index_name: String,
}

impl StaticMeta {
    pub fn write_to(&self, page: &mut PageBuf) -> Result<(), StorageError> {
        if self.host.len() > HOST_MAX {
            return Err(StorageError::MetaOverflow {
                field: "host",
                len: self.host.len(),
                max: HOST_MAX,
            });
        }
        if self.index_name.len() > INDEX_NAME_MAX {
            return Err(StorageError::MetaOverflow {
                field: "index_name",
                len: self.index_name.len(),
                max: INDEX_NAME_MAX,
            });
        }
        let bytes = &mut page.0[..];
        write_u32(bytes, 0, self.dimensions);
        write_u32(bytes, 4, self.metric.to_u32());
        bytes[8..8 + HOST_MAX + 1].fill(0);
        bytes[8..8 + self.host.len()].copy_from_slice(self.host.as_bytes());
        let name_at = 8 + HOST_MAX + 1;
        bytes[name_at..name_at + INDEX_NAME_MAX + 1].fill(0);
        bytes[name_at..name_at + self.index_name.len()]
            .copy_from_slice(self.index_name.as_bytes());
        Ok(())
    }

    pub fn read_from(page: &PageBuf) -> Result<Self, StorageError> {
        let bytes = &page.0[..];
        let invalid = |what: &str| StorageError::InvalidPage {
            blk: STATIC_META_BLKNO,
            what: what.to_string(),
        };
        let metric = Metric::from_u32(read_u32(bytes, 4))
            .ok_or_else(|| invalid("unknown metric discriminant"))?;
        let host = read_padded_str(&bytes[8..8 + HOST_MAX + 1])
            .ok_or_else(|| invalid("host is not valid utf-8"))?;
        let name_at = 8 + HOST_MAX + 1;
        let index_name = read_padded_str(&bytes[name_at..name_at + INDEX_NAME_MAX + 1])
            .ok_or_else(|| invalid("index name is not valid utf-8"))?;
        Ok(Self {
            dimensions: read_u32(bytes, 0),
            metric,
            host,
            index_name,
        })
    }
}

fn read_padded_str(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).ok().map(str::to_string)
}

/// Mutable buffer state, block 1.
///
/// The three checkpoints partition the buffer: tuples up to `ready` are
/// confirmed searchable remotely, tuples up to `flush` have been sent,
/// and `latest` is the newest checkpoint that exists at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferMeta {
    pub ready: Checkpoint,
    pub flush: Checkpoint,
    pub latest: Checkpoint,
    pub insert_page: BlockNo,
    pub n_tuples_since_last_checkpoint: u32,
}

impl BufferMeta {
    pub fn write_to(&self, page: &mut PageBuf) {
        let bytes = &mut page.0[..];
        self.ready.write_to(&mut bytes[0..CHECKPOINT_SIZE]);
        self.flush
            .write_to(&mut bytes[CHECKPOINT_SIZE..2 * CHECKPOINT_SIZE]);
        self.latest
            .write_to(&mut bytes[2 * CHECKPOINT_SIZE..3 * CHECKPOINT_SIZE]);
        write_u32(bytes, 3 * CHECKPOINT_SIZE, self.insert_page);
        write_u32(
            bytes,
            3 * CHECKPOINT_SIZE + 4,
            self.n_tuples_since_last_checkpoint,
        );
    }

    pub fn read_from(page: &PageBuf) -> Result<Self, StorageError> {
        let bytes = &page.0[..];
        let checkpoint = |at: usize, which: &str| {
            Checkpoint::read_from(&bytes[at..at + CHECKPOINT_SIZE]).ok_or_else(|| {
                StorageError::InvalidPage {
                    blk: BUFFER_META_BLKNO,
                    what: format!("{which} checkpoint record is absent"),
                }
            })
        };
        Ok(Self {
            ready: checkpoint(0, "ready")?,
            flush: checkpoint(CHECKPOINT_SIZE, "flush")?,
            latest: checkpoint(2 * CHECKPOINT_SIZE, "latest")?,
            insert_page: read_u32(bytes, 3 * CHECKPOINT_SIZE),
            n_tuples_since_last_checkpoint: read_u32(bytes, 3 * CHECKPOINT_SIZE + 4),
        })
    }
}

/// Opaque tail of a buffer page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageOpaque {
    /// Next page in the chain; `None` only on the tail.
    pub next_page: Option<BlockNo>,
    /// Back-pointer to the previous checkpoint's page; `None` before the
    /// first checkpoint exists.
    pub prev_checkpoint: Option<BlockNo>,
    /// Present exactly when this page opens a checkpoint interval.
    pub checkpoint: Option<Checkpoint>,
}

/// Read-only typed view of a buffer page.
pub struct BufferPageRef<'a> {
    bytes: &'a [u8; PAGE_SIZE],
}

impl<'a> BufferPageRef<'a> {
    #[must_use]
    pub fn new(page: &'a PageBuf) -> Self {
        Self { bytes: &page.0 }
    }

    #[must_use]
    pub fn item_count(&self) -> u16 {
        read_u16(self.bytes, 0)
    }

    #[must_use]
    pub fn item(&self, index: u16) -> HeapRef {
        debug_assert!(index < self.item_count());
        let at = PAGE_HEADER_SIZE + usize::from(index) * HEAP_REF_SIZE;
        HeapRef::from_bytes(&self.bytes[at..at + HEAP_REF_SIZE].try_into().unwrap())
    }

    pub fn items(&self) -> impl Iterator<Item = HeapRef> + '_ {
        (0..self.item_count()).map(|i| self.item(i))
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.item_count() >= PAGE_CAPACITY
    }

    #[must_use]
    pub fn opaque(&self) -> PageOpaque {
        let bytes = &self.bytes[OPAQUE_OFFSET..];
        PageOpaque {
            next_page: read_block(bytes, 0),
            prev_checkpoint: read_block(bytes, 4),
            checkpoint: Checkpoint::read_from(&bytes[8..8 + CHECKPOINT_SIZE]),
        }
    }
}

/// Mutable typed view of a buffer page.
pub struct BufferPageMut<'a> {
    bytes: &'a mut [u8; PAGE_SIZE],
}

impl<'a> BufferPageMut<'a> {
    #[must_use]
    pub fn new(page: &'a mut PageBuf) -> Self {
        Self { bytes: &mut page.0 }
    }

    /// Format a fresh page: no items, no successor, no checkpoint.
    pub fn init(&mut self) {
        self.bytes.fill(0);
        write_block(self.bytes, OPAQUE_OFFSET, None);
        write_block(self.bytes, OPAQUE_OFFSET + 4, None);
    }

    #[must_use]
    pub fn item_count(&self) -> u16 {
        read_u16(self.bytes, 0)
    }

    /// Append one item. Returns `false` when the page is full.
    pub fn push_item(&mut self, item: HeapRef) -> bool {
        let count = self.item_count();
        if count >= PAGE_CAPACITY {
            return false;
        }
        let at = PAGE_HEADER_SIZE + usize::from(count) * HEAP_REF_SIZE;
        self.bytes[at..at + HEAP_REF_SIZE].copy_from_slice(&item.to_bytes());
        write_u16(self.bytes, 0, count + 1);
        true
    }

    pub fn set_next_page(&mut self, next: BlockNo) {
        write_block(self.bytes, OPAQUE_OFFSET, Some(next));
    }

    /// Stamp this page as a checkpoint page.
    pub fn set_checkpoint(&mut self, checkpoint: Checkpoint, prev_checkpoint: BlockNo) {
        write_block(self.bytes, OPAQUE_OFFSET + 4, Some(prev_checkpoint));
        checkpoint
            .write_to(&mut self.bytes[OPAQUE_OFFSET + 8..OPAQUE_OFFSET + 8 + CHECKPOINT_SIZE]);
    }
}
