//! Draining flushed-but-unsent checkpoint intervals to the remote service.

use rustc_hash::FxHashSet;

use crate::buffer::liveness;
use crate::buffer::locks::IndexLocks;
use crate::buffer::meta::{self, BufferError};
use crate::config::Config;
use crate::encoder::TupleSource;
use crate::error::{IndexError, Result};
use crate::id::HeapRef;
use crate::page::layout::{BufferPageRef, Checkpoint};
use crate::page::store::PageStore;
use crate::remote::RemoteClient;

/// What one [`Flusher::flush`] call accomplished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// The flush lock was held elsewhere; nothing was attempted.
    pub skipped: bool,
    /// Checkpoint intervals upserted and confirmed.
    pub batches_sent: usize,
    /// Buffer tuples walked across those batches (dead rows included).
    pub tuples_walked: u64,
    /// Flush checkpoint number after this call.
    pub flush_checkpoint: u32,
    /// Ready checkpoint number after this call.
    pub ready_checkpoint: u32,
}

impl FlushReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Uploads `(flush, latest]` one checkpoint interval at a time.
///
/// Only one flusher runs per index; the flush lock is try-acquired and a
/// busy lock means some other caller is already draining. Each batch
/// issues its upsert and a liveness fetch concurrently; the upsert
/// advances `flush`, the fetch opportunistically advances `ready`. A
/// failed upsert stops the flush with `flush` still at the last
/// confirmed checkpoint; re-sending the same interval later is safe
/// because upserts are idempotent on id.
pub struct Flusher<'a> {
    store: &'a PageStore,
    locks: &'a IndexLocks,
    client: &'a dyn RemoteClient,
    source: &'a dyn TupleSource,
    config: &'a Config,
}

impl<'a> Flusher<'a> {
    #[must_use]
    pub fn new(
        store: &'a PageStore,
        locks: &'a IndexLocks,
        client: &'a dyn RemoteClient,
        source: &'a dyn TupleSource,
        config: &'a Config,
    ) -> Self {
        Self {
            store,
            locks,
            client,
            source,
            config,
        }
    }

    /// Flush up to `max_batches` checkpoint intervals (all of them when
    /// `None`).
    pub async fn flush(&self, max_batches: Option<usize>) -> Result<FlushReport> {
        let Some(_flush_guard) = self.locks.try_flush() else {
            tracing::info!("flush lock not available; the buffer is already being drained");
            return Ok(FlushReport::skipped());
        };

        let static_meta = meta::snapshot_static_meta(self.store)?;
        let host = static_meta.host.as_str();
        let max_batches = max_batches.unwrap_or(usize::MAX);
        let max_probe = self.config.max_fetched_vectors_for_liveness_check as usize;

        let mut buffer_meta = meta::snapshot_buffer_meta(self.store)?;
        let mut report = FlushReport::default();

        while buffer_meta.flush.checkpoint_no < buffer_meta.latest.checkpoint_no
            && report.batches_sent < max_batches
        {
            let (refs, next_checkpoint) = collect_interval(self.store, &buffer_meta.flush)?;
            let mut vectors = Vec::with_capacity(refs.len());
            for heap_ref in &refs {
                // Rows deleted since the append are skipped; their ids
                // simply never reach the service again.
                if let Some(vector) = self.source.encode(*heap_ref)? {
                    vectors.push(vector);
                }
            }

            let pending = liveness::pending_checkpoints(self.store, &buffer_meta, max_probe)?;
            let probe_ids = liveness::probe_ids(&pending);
            let (upserted, fetched) = tokio::join!(
                self.client.upsert_batch(host, &vectors),
                fetch_if_any(self.client, host, &probe_ids),
            );

            // A failed or indeterminate upsert means this interval was
            // not confirmed; flush stays put and the next flush re-sends
            // the same interval.
            upserted.map_err(IndexError::from)?;
            meta::advance_flush(self.store, &next_checkpoint)?;
            report.batches_sent += 1;
            report.tuples_walked += refs.len() as u64;

            match fetched {
                Ok(fetched) => {
                    liveness::advance_from_fetch(self.store, &pending, &fetched)?;
                }
                // The probe is opportunistic; a failed fetch only delays
                // Ready.
                Err(error) => tracing::debug!(%error, "liveness fetch failed"),
            }

            buffer_meta = meta::snapshot_buffer_meta(self.store)?;
        }

        report.flush_checkpoint = buffer_meta.flush.checkpoint_no;
        report.ready_checkpoint = buffer_meta.ready.checkpoint_no;
        tracing::debug!(
            batches = report.batches_sent,
            flush = report.flush_checkpoint,
            ready = report.ready_checkpoint,
            "flush finished"
        );
        Ok(report)
    }
}

async fn fetch_if_any(
    client: &dyn RemoteClient,
    host: &str,
    ids: &[String],
) -> std::result::Result<FxHashSet<String>, crate::remote::RemoteError> {
    if ids.is_empty() {
        return Ok(FxHashSet::default());
    }
    client.fetch_by_ids(host, ids).await
}

/// Collect the tuples of the checkpoint interval `(from, from+1]`: the
/// items after `from`'s representative, across any overflow pages, up to
/// and including the next checkpoint's representative.
fn collect_interval(
    store: &PageStore,
    from: &Checkpoint,
) -> std::result::Result<(Vec<HeapRef>, Checkpoint), BufferError> {
    let mut refs = Vec::new();
    // The representative is the first item of its checkpoint page and was
    // part of the previous interval; the initial checkpoint has none.
    let mut skip = u16::from(from.checkpoint_no > 0);
    let mut blk = from.page;
    loop {
        let page = store.snapshot(blk)?;
        let view = BufferPageRef::new(&page);
        let opaque = view.opaque();

        if blk != from.page {
            if let Some(checkpoint) = opaque.checkpoint {
                refs.push(view.item(0));
                return Ok((refs, checkpoint));
            }
        }

        for index in skip..view.item_count() {
            refs.push(view.item(index));
        }
        skip = 0;

        blk = opaque.next_page.ok_or_else(|| BufferError::Corruption {
            what: format!(
                "buffer chain ended at page {blk} before reaching checkpoint {}",
                from.checkpoint_no + 1
            ),
        })?;
    }
}
