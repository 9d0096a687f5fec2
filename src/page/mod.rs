//! Paged storage: on-disk layout and the crash-atomic page store.
//!
//! Block 0 holds the immutable static metadata, block 1 the mutable
//! buffer metadata, and every block from 2 up is a buffer page of
//! fixed-size [`crate::id::HeapRef`] items with an opaque tail. The
//! [`store::PageStore`] hands out snapshot reads and shadow-image write
//! transactions so that a group of page mutations is applied atomically.

pub mod layout;
pub mod store;

use miette::Diagnostic;
use thiserror::Error;

/// Block number within the index relation.
pub type BlockNo = u32;

/// Errors raised by the paged storage layer.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    /// A block that the buffer chain or metadata referenced does not exist.
    #[error("block {blk} is out of range (relation has {pages} pages)")]
    #[diagnostic(code(remora::page::missing_block))]
    MissingBlock { blk: BlockNo, pages: u32 },

    /// The relation cannot be extended any further.
    #[error("cannot extend relation past {max_pages} pages")]
    #[diagnostic(
        code(remora::page::resource_exhausted),
        help("raise the page store capacity or flush and vacuum the buffer")
    )]
    ResourceExhausted { max_pages: u32 },

    /// A page's content or opaque did not decode as its block kind demands.
    #[error("invalid page {blk}: {what}")]
    #[diagnostic(code(remora::page::invalid_page))]
    InvalidPage { blk: BlockNo, what: String },

    /// A fixed-width metadata field overflowed.
    #[error("{field} is {len} bytes, at most {max} fit the meta page")]
    #[diagnostic(code(remora::page::meta_overflow))]
    MetaOverflow {
        field: &'static str,
        len: usize,
        max: usize,
    },
}
