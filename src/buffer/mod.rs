//! The write-path buffer: append, checkpoint FIFO, flush and liveness.
//!
//! Appended tuples accumulate in the page chain; every `batch_size`
//! appends a checkpoint demarcates a flushable batch. The flusher drains
//! `(flush, latest]` to the remote service and the liveness probe moves
//! `ready` forward once the service proves a representative searchable.
//!
//! ```text
//!  head ──────────── ready ─────────── flush ─────────── latest ── tail
//!   │  confirmed live  │   sent, not    │   appended,     │  not yet
//!   │  on the remote   │   yet indexed  │   not yet sent  │  demarcated
//! ```

pub mod appender;
pub mod flusher;
pub mod liveness;
pub mod locks;
pub mod meta;

pub use appender::Appender;
pub use flusher::{FlushReport, Flusher};
pub use locks::IndexLocks;
pub use meta::BufferError;
