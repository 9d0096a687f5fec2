//! # Remora: a buffered remote-ANN secondary index
//!
//! Remora exposes a remote approximate-nearest-neighbor vector service as
//! a local, transactional secondary index. Rows written to a base table
//! become vectors in the remote service; distance-ordered queries are
//! answered by the service, merged with rows it cannot see yet, and
//! yielded in distance order.
//!
//! The heart of the crate is a durable, page-structured append-only
//! buffer of recently inserted tuple identifiers, partitioned by a
//! checkpoint FIFO into three monotone regions:
//!
//! ```text
//! Writes ──► Appender ──► buffer pages ── checkpoint every batch ──┐
//!                                                                  │
//!            Flusher ◄── (flush, latest] ◄────────────────────────-┘
//!               │ upsert batches + paired liveness fetch
//!               ▼
//!        Remote service ──► LivenessProbe advances ready
//!
//! Reads ──► Scanner ──► remote top-K  ∥  local scan of [ready, tail]
//!                └── merge by distance, bloom-filter deduplication
//! ```
//!
//! - **ready**: everything up to here is confirmed searchable remotely.
//! - **flush**: everything up to here has been sent, not yet confirmed.
//! - **latest**: the newest checkpoint that exists in the buffer.
//!
//! ## Quick start
//!
//! ```no_run
//! # use std::sync::Arc;
//! use remora::{Config, IndexOptions, Metric, RemoteIndex, HeapRef};
//! use remora::encoder::MemoryTupleSource;
//! use remora::page::store::PageStore;
//! use remora::remote::http::HttpClient;
//!
//! # async fn example() -> remora::error::Result<()> {
//! let config = Config::from_env()?;
//! let store = Arc::new(PageStore::new());
//! let source = Arc::new(MemoryTupleSource::new(768));
//! let client = Arc::new(HttpClient::new(&config)?);
//!
//! let options = IndexOptions::with_spec(
//!     r#"{"serverless":{"cloud":"aws","region":"us-west-2"}}"#,
//! )?;
//! let (index, _report) = RemoteIndex::build(
//!     store, client, source, config, &options, Metric::Cosine, 16385, "items",
//! )
//! .await?;
//!
//! index.insert(HeapRef::new(0, 1)).await?;
//! let hits = index.search(&vec![0.0; 768], &[], Some(10)).await?;
//! for hit in hits {
//!     println!("{} at distance >= {}", hit.heap_ref, hit.distance_lower_bound);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`id`] - tuple identifiers and their 12-hex remote encoding
//! - [`page`] - on-disk layout and the crash-atomic page store
//! - [`buffer`] - appender, checkpoint FIFO, flusher and liveness probe
//! - [`remote`] - the remote service contract and its HTTP client
//! - [`scan`] - query merge: bloom filter, bounded sort, result stream
//! - [`build`] - one-shot index build
//! - [`encoder`] - the base-table seam
//! - [`config`] / [`error`] - tuning knobs and the error taxonomy
//! - [`admin`] - housekeeping helpers

pub mod admin;
pub mod buffer;
pub mod build;
pub mod config;
pub mod encoder;
pub mod error;
pub mod id;
pub mod index;
pub mod page;
pub mod remote;
pub mod scan;
pub mod vector;

pub use config::{Config, IndexOptions};
pub use error::IndexError;
pub use id::HeapRef;
pub use index::RemoteIndex;
pub use scan::{Scan, ScanHit};
pub use vector::Metric;
