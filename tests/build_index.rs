//! Index-build scenarios: remote creation, page initialization, batched
//! base-table upload, and the admin helpers.

mod common;
use common::*;

use std::collections::BTreeMap;
use std::sync::Arc;

use remora::build::{BuildPhase, IndexBuilder, init_index_pages};
use remora::config::{Config, IndexOptions};
use remora::encoder::MemoryTupleSource;
use remora::id::HeapRef;
use remora::page::layout::StaticMeta;
use remora::page::store::PageStore;
use remora::vector::Metric;
use remora::{IndexError, RemoteIndex, admin};

fn populated_source(rows: u16) -> MemoryTupleSource {
    init_tracing();
    let source = MemoryTupleSource::new(2);
    for offset in 1..=rows {
        source.insert_row(
            HeapRef::new(0, offset),
            vec![offset as f32, 1.0],
            BTreeMap::new(),
        );
    }
    source
}

#[tokio::test]
async fn build_creates_remote_index_and_uploads_in_batches() {
    let store = PageStore::new();
    let remote = MockRemote::new();
    let source = populated_source(10);
    let config = Config::new("test-key").with_batch_shape(4, 1);
    let options = IndexOptions::with_spec(r#"{"serverless":{"cloud":"aws"}}"#).unwrap();

    let mut builder = IndexBuilder::new(&store, &remote, &source, &config);
    assert_eq!(builder.phase(), BuildPhase::Init);
    let report = builder
        .build(&options, Metric::Cosine, "remora-1-items-abcd")
        .await
        .expect("build");

    assert_eq!(builder.phase(), BuildPhase::Done);
    assert_eq!(report.heap_tuples, 10);
    assert_eq!(report.index_tuples, 10);
    assert_eq!(report.host, TEST_HOST);

    // Ten rows at a batch size of four: 4 + 4 + 2.
    let batches = remote.upserted_batches.lock().clone();
    assert_eq!(
        batches.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![4, 4, 2]
    );

    // Pages 0..=2 exist and carry the static and buffer meta.
    assert_eq!(store.page_count(), 3);
    let static_meta = remora::buffer::meta::snapshot_static_meta(&store).unwrap();
    assert_eq!(static_meta.host, TEST_HOST);
    assert_eq!(static_meta.index_name, "remora-1-items-abcd");
    assert_eq!(static_meta.metric, Metric::Cosine);
    let buffer_meta = remora::buffer::meta::snapshot_buffer_meta(&store).unwrap();
    assert_eq!(buffer_meta.total_tuples(), 0);
}

#[tokio::test]
async fn adopting_a_host_with_overwrite_clears_it_first() {
    let store = PageStore::new();
    let remote = MockRemote::new();
    remote.indexed.lock().insert("00000000beef".to_string());
    let source = populated_source(2);
    let config = Config::new("test-key").with_batch_shape(4, 1);
    let mut options = IndexOptions::with_host(TEST_HOST);
    options.overwrite = true;

    let mut builder = IndexBuilder::new(&store, &remote, &source, &config);
    let report = builder
        .build(&options, Metric::Euclidean, "")
        .await
        .expect("build");

    assert_eq!(report.index_tuples, 2);
    let indexed = remote.indexed_ids();
    assert!(!indexed.contains("00000000beef"), "stale vector survived");
    assert_eq!(indexed.len(), 2);
}

#[tokio::test]
async fn skip_build_initializes_pages_only() {
    let store = PageStore::new();
    let remote = MockRemote::new();
    let source = populated_source(5);
    let config = Config::new("test-key");
    let mut options = IndexOptions::with_host(TEST_HOST);
    options.skip_build = true;

    let mut builder = IndexBuilder::new(&store, &remote, &source, &config);
    let report = builder
        .build(&options, Metric::Euclidean, "")
        .await
        .expect("build");

    assert_eq!(report.index_tuples, 0);
    assert!(remote.upserted_batches.lock().is_empty());
    assert_eq!(store.page_count(), 3);
}

#[tokio::test]
async fn building_over_a_non_empty_relation_fails() {
    let store = PageStore::new();
    init_index_pages(
        &store,
        &StaticMeta {
            dimensions: 2,
            metric: Metric::Euclidean,
            host: TEST_HOST.into(),
            index_name: String::new(),
        },
    )
    .unwrap();
    let error = init_index_pages(
        &store,
        &StaticMeta {
            dimensions: 2,
            metric: Metric::Euclidean,
            host: TEST_HOST.into(),
            index_name: String::new(),
        },
    )
    .unwrap_err();
    assert!(matches!(error, IndexError::Storage(_)));
}

#[tokio::test]
async fn facade_build_insert_and_search() {
    let store = Arc::new(PageStore::new());
    let remote = Arc::new(MockRemote::new());
    let source = Arc::new(populated_source(5));
    let config = Config::new("test-key").with_batch_shape(4, 1);
    let options = IndexOptions::with_spec(r#"{"serverless":{"cloud":"aws"}}"#).unwrap();

    let (index, report) = RemoteIndex::build(
        store,
        remote.clone(),
        source.clone(),
        config,
        &options,
        Metric::Euclidean,
        16385,
        "items",
    )
    .await
    .expect("build");
    assert_eq!(report.heap_tuples, 5);
    assert!(report.index_name.starts_with("remora-16385-items-"));

    // A fresh row inserted after the build reaches the buffer; four of
    // them complete a batch and flush.
    for offset in 6..=9 {
        let heap_ref = HeapRef::new(0, offset);
        source.insert_row(heap_ref, vec![offset as f32, 1.0], BTreeMap::new());
        let flushed = index.insert(heap_ref).await.expect("insert");
        assert_eq!(flushed.is_some(), offset == 9);
    }

    let hits: Vec<_> = index
        .search(&[0.0, 0.0], &[], Some(3))
        .await
        .expect("search")
        .collect();
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn inserting_a_zero_vector_changes_nothing() {
    let index = TestIndex::small();
    let facade = index.facade();
    let heap_ref = HeapRef::new(0, 1);
    index.source.insert_row(heap_ref, vec![0.0, 0.0], BTreeMap::new());

    let before = index.buffer_meta();
    let error = facade.insert(heap_ref).await.unwrap_err();
    assert!(matches!(error, IndexError::Encode(_)));
    assert_eq!(index.buffer_meta(), before);
}

#[tokio::test]
async fn unused_managed_remote_indexes_are_deleted() {
    let remote = MockRemote::new();
    *remote.index_names.lock() = vec![
        "remora-1-items-aaaa".to_string(),
        "remora-2-gone-bbbb".to_string(),
        "someone-elses-index".to_string(),
    ];

    let deleted =
        admin::delete_unused_remote_indexes(&remote, &["remora-1-items-aaaa".to_string()])
            .await
            .expect("cleanup");
    assert_eq!(deleted, vec!["remora-2-gone-bbbb".to_string()]);
    assert_eq!(
        *remote.index_names.lock(),
        vec![
            "remora-1-items-aaaa".to_string(),
            "someone-elses-index".to_string(),
        ]
    );
}

#[tokio::test]
async fn index_state_dump_names_every_page() {
    let index = TestIndex::small();
    index.append_rows(&refs(5));
    let dump = admin::print_index_state(&index.store).expect("dump");
    assert!(dump.contains("Static meta:"));
    assert!(dump.contains("insert page: 3"));
    assert!(dump.contains("Page 2:"));
    assert!(dump.contains("Page 3:"));
}
