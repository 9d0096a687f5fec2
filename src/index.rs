//! The index facade: one object wiring the page store, the remote
//! client, the base-table seam and the configuration together.

use std::sync::Arc;

use crate::buffer::appender::Appender;
use crate::buffer::flusher::{FlushReport, Flusher};
use crate::buffer::locks::IndexLocks;
use crate::buffer::meta;
use crate::build::{BuildReport, IndexBuilder, generate_index_name};
use crate::config::{Config, IndexOptions};
use crate::encoder::TupleSource;
use crate::error::Result;
use crate::id::HeapRef;
use crate::page::layout::{BufferMeta, StaticMeta};
use crate::page::store::PageStore;
use crate::remote::{RemoteClient, ScanKey};
use crate::scan::merger::{Scan, Scanner};
use crate::vector::Metric;

/// A remote-backed secondary index over one base table.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use remora::{Config, IndexOptions, RemoteIndex, Metric, HeapRef};
/// # use remora::encoder::MemoryTupleSource;
/// # use remora::page::store::PageStore;
/// # use remora::remote::http::HttpClient;
/// # async fn example() -> remora::error::Result<()> {
/// let config = Config::new("api-key").with_control_url("https://api.example");
/// let store = Arc::new(PageStore::new());
/// let source = Arc::new(MemoryTupleSource::new(768));
/// let client = Arc::new(HttpClient::new(&config)?);
///
/// let options = IndexOptions::with_spec(r#"{"serverless":{"cloud":"aws","region":"us-west-2"}}"#)?;
/// let (index, report) = RemoteIndex::build(
///     store, client, source, config, &options, Metric::Cosine, 16385, "items",
/// )
/// .await?;
/// println!("uploaded {} vectors to {}", report.index_tuples, report.host);
///
/// index.insert(HeapRef::new(0, 1)).await?;
/// for hit in index.search(&vec![0.0; 768], &[], Some(10)).await? {
///     println!("{} at >= {}", hit.heap_ref, hit.distance_lower_bound);
/// }
/// # Ok(())
/// # }
/// ```
pub struct RemoteIndex {
    store: Arc<PageStore>,
    client: Arc<dyn RemoteClient>,
    source: Arc<dyn TupleSource>,
    config: Config,
    locks: IndexLocks,
}

impl RemoteIndex {
    /// Open an index whose pages already exist.
    pub fn open(
        store: Arc<PageStore>,
        client: Arc<dyn RemoteClient>,
        source: Arc<dyn TupleSource>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        meta::snapshot_static_meta(&store)?;
        meta::snapshot_buffer_meta(&store)?;
        Ok(Self {
            store,
            client,
            source,
            config,
            locks: IndexLocks::new(),
        })
    }

    /// Build a fresh index (remote side and local pages) and open it.
    ///
    /// `relation_tag` and `relation_name` identify the host relation and
    /// feed the generated remote index name; they are unused when
    /// attaching to an existing `host`.
    #[allow(clippy::too_many_arguments)]
    pub async fn build(
        store: Arc<PageStore>,
        client: Arc<dyn RemoteClient>,
        source: Arc<dyn TupleSource>,
        config: Config,
        options: &IndexOptions,
        metric: Metric,
        relation_tag: u32,
        relation_name: &str,
    ) -> Result<(Self, BuildReport)> {
        let index_name = if options.spec.is_some() {
            generate_index_name(relation_tag, relation_name)?
        } else {
            String::new()
        };
        let report = {
            let mut builder =
                IndexBuilder::new(&store, client.as_ref(), source.as_ref(), &config);
            builder.build(options, metric, &index_name).await?
        };
        let index = Self::open(store, client, source, config)?;
        Ok((index, report))
    }

    /// Insert one row into the index.
    ///
    /// The row is encoded first (a zero vector fails here, before the
    /// buffer changes), then its identifier is appended. When the append
    /// crosses a batch boundary, the new checkpoint triggers a flush and
    /// its report is returned.
    pub async fn insert(&self, heap_ref: HeapRef) -> Result<Option<FlushReport>> {
        self.source.encode(heap_ref)?;

        let appender = Appender::new(&self.store, &self.locks, &self.config);
        let checkpoint_created = appender.append(heap_ref)?;
        if !checkpoint_created {
            return Ok(None);
        }
        let report = self.flush(None).await?;
        Ok(Some(report))
    }

    /// Drain flushed-but-unsent checkpoint intervals; see
    /// [`Flusher::flush`].
    pub async fn flush(&self, max_batches: Option<usize>) -> Result<FlushReport> {
        let flusher = Flusher::new(
            &self.store,
            &self.locks,
            self.client.as_ref(),
            self.source.as_ref(),
            &self.config,
        );
        flusher.flush(max_batches).await
    }

    /// Scan ordered by distance to `query`. `top_k` defaults to the
    /// configured value.
    pub async fn search(
        &self,
        query: &[f32],
        keys: &[ScanKey],
        top_k: Option<u32>,
    ) -> Result<Scan> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        let scanner = Scanner::new(
            &self.store,
            self.client.as_ref(),
            self.source.as_ref(),
            &self.config,
        );
        scanner.rescan(query, keys, top_k).await
    }

    pub fn static_meta(&self) -> Result<StaticMeta> {
        Ok(meta::snapshot_static_meta(&self.store)?)
    }

    pub fn buffer_meta(&self) -> Result<BufferMeta> {
        Ok(meta::snapshot_buffer_meta(&self.store)?)
    }

    #[must_use]
    pub fn store(&self) -> &PageStore {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}
