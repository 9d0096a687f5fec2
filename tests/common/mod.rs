//! Shared fixtures: a scriptable remote service and a locally built
//! index over an in-memory base table.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Once};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use remora::buffer::IndexLocks;
use remora::build::init_index_pages;
use remora::config::Config;
use remora::encoder::MemoryTupleSource;
use remora::id::HeapRef;
use remora::page::layout::StaticMeta;
use remora::page::store::PageStore;
use remora::remote::{
    IndexStatus, QueryMatch, RemoteClient, RemoteError, RemoteErrorKind, RemoteVector,
};
use remora::vector::Metric;

pub const TEST_HOST: &str = "idx-test.svc.example";

static TRACING: Once = Once::new();

/// Install a fmt subscriber once per test binary so `RUST_LOG=debug`
/// surfaces the crate's tracing output in failing tests.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// In-memory stand-in for the remote service.
///
/// Upserted ids are remembered; `fetch_by_ids` returns the intersection
/// of the probed ids with everything upserted so far (optionally further
/// restricted by `fetch_filter`), which models a service that indexes in
/// insertion order. Upsert calls can be scripted to fail.
#[derive(Default)]
pub struct MockRemote {
    pub upserted_batches: Mutex<Vec<Vec<String>>>,
    pub indexed: Mutex<FxHashSet<String>>,
    pub index_names: Mutex<Vec<String>>,
    pub fetch_filter: Mutex<Option<FxHashSet<String>>>,
    pub query_results: Mutex<Vec<QueryMatch>>,
    pub query_filters: Mutex<Vec<serde_json::Value>>,
    pub fetch_requests: Mutex<Vec<Vec<String>>>,
    pub fail_upsert_calls: Mutex<FxHashSet<usize>>,
    pub upsert_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_query_results(&self, matches: Vec<(HeapRef, f64)>) {
        *self.query_results.lock() = matches
            .into_iter()
            .map(|(heap_ref, score)| QueryMatch {
                id: heap_ref.vector_id(),
                score,
            })
            .collect();
    }

    /// Restrict what `fetch_by_ids` may confirm, regardless of upserts.
    pub fn set_fetch_filter(&self, ids: impl IntoIterator<Item = String>) {
        *self.fetch_filter.lock() = Some(ids.into_iter().collect());
    }

    /// Make the n-th upsert call (1-based) fail.
    pub fn fail_upsert_call(&self, call: usize) {
        self.fail_upsert_calls.lock().insert(call);
    }

    pub fn indexed_ids(&self) -> FxHashSet<String> {
        self.indexed.lock().clone()
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn create_index(
        &self,
        _name: &str,
        _dimensions: u32,
        _metric: Metric,
        _spec: &serde_json::Value,
    ) -> Result<String, RemoteError> {
        Ok(TEST_HOST.to_string())
    }

    async fn describe_index(&self, _name: &str) -> Result<IndexStatus, RemoteError> {
        Ok(IndexStatus {
            ready: true,
            host: Some(TEST_HOST.to_string()),
        })
    }

    async fn list_indexes(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.index_names.lock().clone())
    }

    async fn delete_index(&self, name: &str) -> Result<(), RemoteError> {
        self.index_names.lock().retain(|n| n != name);
        Ok(())
    }

    async fn upsert_batch(
        &self,
        _host: &str,
        vectors: &[RemoteVector],
    ) -> Result<(), RemoteError> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_upsert_calls.lock().remove(&call) {
            return Err(RemoteError {
                kind: RemoteErrorKind::Api,
                http_status: Some(500),
                body_excerpt: Some("scripted failure".into()),
            });
        }
        let ids: Vec<String> = vectors.iter().map(|v| v.id.clone()).collect();
        self.indexed.lock().extend(ids.iter().cloned());
        self.upserted_batches.lock().push(ids);
        Ok(())
    }

    async fn query(
        &self,
        _host: &str,
        _top_k: u32,
        _vector: &[f32],
        filter: &serde_json::Value,
    ) -> Result<Vec<QueryMatch>, RemoteError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.query_filters.lock().push(filter.clone());
        Ok(self.query_results.lock().clone())
    }

    async fn fetch_by_ids(
        &self,
        _host: &str,
        ids: &[String],
    ) -> Result<FxHashSet<String>, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_requests.lock().push(ids.to_vec());
        let indexed = self.indexed.lock();
        let filter = self.fetch_filter.lock();
        Ok(ids
            .iter()
            .filter(|id| indexed.contains(*id))
            .filter(|id| filter.as_ref().is_none_or(|f| f.contains(*id)))
            .cloned()
            .collect())
    }

    async fn delete_all(&self, _host: &str) -> Result<(), RemoteError> {
        self.indexed.lock().clear();
        Ok(())
    }

    async fn delete_ids(&self, _host: &str, ids: &[String]) -> Result<(), RemoteError> {
        let mut indexed = self.indexed.lock();
        for id in ids {
            indexed.remove(id);
        }
        Ok(())
    }
}

/// A locally initialized index with all the loose parts exposed, so
/// tests can drive the appender, flusher and scanner directly.
pub struct TestIndex {
    pub store: Arc<PageStore>,
    pub source: Arc<MemoryTupleSource>,
    pub remote: Arc<MockRemote>,
    pub config: Config,
    pub locks: IndexLocks,
}

impl TestIndex {
    /// Two-dimensional index with a batch size of 4, matching the
    /// scenario scripts.
    pub fn small() -> Self {
        Self::with_config(
            Config::new("test-key")
                .with_batch_shape(4, 1)
                .with_max_probe(10),
        )
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let store = Arc::new(PageStore::new());
        init_index_pages(
            &store,
            &StaticMeta {
                dimensions: 2,
                metric: Metric::Euclidean,
                host: TEST_HOST.to_string(),
                index_name: "remora-1-test-abcd".to_string(),
            },
        )
        .expect("page init");
        Self {
            store,
            source: Arc::new(MemoryTupleSource::new(2)),
            remote: Arc::new(MockRemote::new()),
            config,
            locks: IndexLocks::new(),
        }
    }

    /// Give `heap_ref` a base-table row with a distinctive vector.
    pub fn put_row(&self, heap_ref: HeapRef, values: [f32; 2]) {
        self.source
            .insert_row(heap_ref, values.to_vec(), BTreeMap::new());
    }

    pub fn appender(&self) -> remora::buffer::Appender<'_> {
        remora::buffer::Appender::new(&self.store, &self.locks, &self.config)
    }

    pub fn flusher(&self) -> remora::buffer::Flusher<'_> {
        remora::buffer::Flusher::new(
            &self.store,
            &self.locks,
            self.remote.as_ref(),
            self.source.as_ref(),
            &self.config,
        )
    }

    pub fn scanner(&self) -> remora::scan::Scanner<'_> {
        remora::scan::Scanner::new(
            &self.store,
            self.remote.as_ref(),
            self.source.as_ref(),
            &self.config,
        )
    }

    pub fn buffer_meta(&self) -> remora::page::layout::BufferMeta {
        remora::buffer::meta::snapshot_buffer_meta(&self.store).expect("buffer meta")
    }

    /// The high-level facade over the same store, source and remote.
    pub fn facade(&self) -> remora::RemoteIndex {
        remora::RemoteIndex::open(
            self.store.clone(),
            self.remote.clone(),
            self.source.clone(),
            self.config.clone(),
        )
        .expect("open facade")
    }

    /// Append `refs`, inserting a base-table row for each first.
    pub fn append_rows(&self, refs: &[HeapRef]) -> Vec<bool> {
        let appender = self.appender();
        refs.iter()
            .map(|heap_ref| {
                self.put_row(*heap_ref, [heap_ref.offset as f32, 1.0]);
                appender.append(*heap_ref).expect("append")
            })
            .collect()
    }
}

/// `h1..=hn` from the scenario scripts: block 0, offsets 1..=n.
pub fn refs(n: u16) -> Vec<HeapRef> {
    (1..=n).map(|offset| HeapRef::new(0, offset)).collect()
}

/// Walk the page chain from the buffer head, asserting the structural
/// invariants: every page reachable exactly once, exactly one tail, the
/// tail is the insert page, and checkpoint back-pointers step one
/// checkpoint at a time.
pub fn verify_chain(index: &TestIndex) -> Vec<u32> {
    use remora::page::layout::{BUFFER_HEAD_BLKNO, BufferPageRef};

    let meta = index.buffer_meta();
    let mut visited = Vec::new();
    let mut seen = FxHashSet::default();
    let mut next = Some(BUFFER_HEAD_BLKNO);
    let mut total_items: u64 = 0;
    while let Some(blk) = next {
        assert!(seen.insert(blk), "page {blk} reachable twice");
        visited.push(blk);
        let page = index.store.snapshot(blk).expect("snapshot");
        let view = BufferPageRef::new(&page);
        total_items += u64::from(view.item_count());
        let opaque = view.opaque();
        if let Some(checkpoint) = opaque.checkpoint {
            assert_eq!(checkpoint.page, blk);
            let prev_blk = opaque.prev_checkpoint.expect("checkpoint back-pointer");
            if checkpoint.checkpoint_no > 1 {
                let prev = index.store.snapshot(prev_blk).expect("snapshot");
                let prev_checkpoint = BufferPageRef::new(&prev)
                    .opaque()
                    .checkpoint
                    .expect("previous checkpoint page");
                assert_eq!(prev_checkpoint.checkpoint_no, checkpoint.checkpoint_no - 1);
            } else {
                assert_eq!(prev_blk, BUFFER_HEAD_BLKNO);
            }
        }
        if opaque.next_page.is_none() {
            assert_eq!(blk, meta.insert_page, "tail is not the insert page");
        }
        next = opaque.next_page;
    }
    assert_eq!(total_items, meta.total_tuples(), "item count drifted");
    visited
}
