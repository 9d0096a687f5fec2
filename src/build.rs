//! One-shot index build: create (or adopt) the remote index, initialize
//! the local pages, and upload the base table in batches.

use std::time::Duration;

use rand::Rng;

use crate::config::{Config, IndexOptions};
use crate::encoder::TupleSource;
use crate::error::{IndexError, Result};
use crate::page::layout::{
    BUFFER_HEAD_BLKNO, BUFFER_META_BLKNO, BufferMeta, BufferPageMut, STATIC_META_BLKNO, StaticMeta,
};
use crate::page::store::PageStore;
use crate::page::StorageError;
use crate::remote::{RemoteClient, RemoteVector};
use crate::vector::Metric;

/// How long a build waits for a freshly created remote index.
const READY_TIMEOUT: Duration = Duration::from_secs(300);
/// First describe-poll delay; doubles up to [`READY_POLL_MAX`].
const READY_POLL_START: Duration = Duration::from_millis(250);
const READY_POLL_MAX: Duration = Duration::from_secs(5);

const INDEX_NAME_MAX: usize = 45;

/// Where a build currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildPhase {
    Init,
    CreatingRemote,
    WaitingReady,
    PagesInitialized,
    Uploading,
    Done,
}

/// Outcome of a completed build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildReport {
    /// Live base-table rows scanned.
    pub heap_tuples: u64,
    /// Vectors uploaded to the remote index.
    pub index_tuples: u64,
    pub host: String,
    pub index_name: String,
}

/// Builds one index against an empty page store.
pub struct IndexBuilder<'a> {
    store: &'a PageStore,
    client: &'a dyn RemoteClient,
    source: &'a dyn TupleSource,
    config: &'a Config,
    phase: BuildPhase,
}

impl<'a> IndexBuilder<'a> {
    #[must_use]
    pub fn new(
        store: &'a PageStore,
        client: &'a dyn RemoteClient,
        source: &'a dyn TupleSource,
        config: &'a Config,
    ) -> Self {
        Self {
            store,
            client,
            source,
            config,
            phase: BuildPhase::Init,
        }
    }

    #[must_use]
    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    /// Run the whole build. `index_name` is the remote index name to
    /// create or adopt; see [`generate_index_name`].
    pub async fn build(
        &mut self,
        options: &IndexOptions,
        metric: Metric,
        index_name: &str,
    ) -> Result<BuildReport> {
        self.config.validate()?;
        options.validate()?;
        let dimensions = self.source.dimensions();

        let host = match (&options.spec, &options.host) {
            (Some(spec), None) => {
                self.phase = BuildPhase::CreatingRemote;
                let host = self
                    .client
                    .create_index(index_name, dimensions, metric, spec)
                    .await?;
                self.phase = BuildPhase::WaitingReady;
                self.wait_ready(index_name).await?;
                host
            }
            (None, Some(host)) => {
                if options.overwrite {
                    self.client.delete_all(host).await?;
                }
                host.clone()
            }
            // validate() has already ruled the other combinations out
            _ => unreachable!(),
        };

        let static_meta = StaticMeta {
            dimensions,
            metric,
            host: host.clone(),
            index_name: index_name.to_string(),
        };
        init_index_pages(self.store, &static_meta)?;
        self.phase = BuildPhase::PagesInitialized;

        let mut report = BuildReport {
            heap_tuples: 0,
            index_tuples: 0,
            host: host.clone(),
            index_name: index_name.to_string(),
        };
        if options.skip_build {
            self.phase = BuildPhase::Done;
            return Ok(report);
        }

        self.phase = BuildPhase::Uploading;
        let batch_size = self.config.batch_size() as usize;
        let mut batch: Vec<RemoteVector> = Vec::with_capacity(batch_size);
        for row in self.source.scan() {
            let (_, vector) = row?;
            report.heap_tuples += 1;
            batch.push(vector);
            if batch.len() >= batch_size {
                self.client.upsert_batch(&host, &batch).await?;
                report.index_tuples += batch.len() as u64;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            self.client.upsert_batch(&host, &batch).await?;
            report.index_tuples += batch.len() as u64;
        }

        self.phase = BuildPhase::Done;
        tracing::debug!(
            heap_tuples = report.heap_tuples,
            index_tuples = report.index_tuples,
            host = %report.host,
            "index build finished"
        );
        Ok(report)
    }

    async fn wait_ready(&self, index_name: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        let mut delay = READY_POLL_START;
        loop {
            let status = self.client.describe_index(index_name).await?;
            if status.ready {
                return Ok(());
            }
            if tokio::time::Instant::now() + delay > deadline {
                return Err(IndexError::BuildTimeout {
                    name: index_name.to_string(),
                    seconds: READY_TIMEOUT.as_secs(),
                });
            }
            tracing::debug!(index_name, "waiting for remote index to initialize");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(READY_POLL_MAX);
        }
    }
}

/// Create the static meta page, the buffer meta page and the empty buffer
/// head in a single log transaction. The store must be empty.
pub fn init_index_pages(store: &PageStore, static_meta: &StaticMeta) -> Result<()> {
    if store.page_count() != 0 {
        return Err(StorageError::InvalidPage {
            blk: STATIC_META_BLKNO,
            what: "relation is not empty".into(),
        }
        .into());
    }
    let mut txn = store.begin();
    let (blk0, static_handle) = txn.new_page()?;
    let (blk1, meta_handle) = txn.new_page()?;
    let (blk2, head_handle) = txn.new_page()?;
    debug_assert_eq!(
        (blk0, blk1, blk2),
        (STATIC_META_BLKNO, BUFFER_META_BLKNO, BUFFER_HEAD_BLKNO)
    );
    static_meta
        .write_to(txn.page_mut(static_handle))
        .map_err(IndexError::from)?;
    BufferMeta::initial().write_to(txn.page_mut(meta_handle));
    BufferPageMut::new(txn.page_mut(head_handle)).init();
    txn.commit();
    Ok(())
}

/// Build a remote index name like `remora-16385-items-x7kq`: a stable
/// prefix, the host relation's tag and name, and a random 4-character
/// suffix, bounded by the service's 45-character limit.
pub fn generate_index_name(tag: u32, relation: &str) -> Result<String> {
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    let name = format!("remora-{tag}-{relation}-{suffix}");
    if name.len() > INDEX_NAME_MAX {
        return Err(IndexError::BadIndexName {
            reason: format!("{} characters exceed the {INDEX_NAME_MAX} limit", name.len()),
            name,
        });
    }
    if let Some(bad) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
        return Err(IndexError::BadIndexName {
            reason: format!("character {bad:?} is not allowed"),
            name,
        });
    }
    Ok(name)
}
