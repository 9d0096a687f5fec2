//! The query-time merge of remote matches and the unready buffer region.
//!
//! A rescan issues the remote top-K query and the liveness fetch
//! concurrently, advances Ready from the fetch, then walks the buffer
//! from the ready checkpoint to the tail computing exact distances into a
//! bounded sort. The resulting [`Scan`] yields tuples in approximate
//! distance order, preferring the local copy of any tuple the buffer
//! still holds: remote matches that hit the bloom filter are dropped as
//! probable duplicates, and a false positive only ever swaps an
//! approximate remote distance for an exact local one.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::buffer::liveness;
use crate::buffer::meta;
use crate::config::Config;
use crate::encoder::TupleSource;
use crate::error::{IndexError, Result};
use crate::id::HeapRef;
use crate::page::layout::BufferPageRef;
use crate::page::store::PageStore;
use crate::remote::{RemoteClient, ScanKey, build_filter};
use crate::scan::CancelToken;
use crate::scan::bloom::BloomFilter;
use crate::scan::sort::BoundedSort;

/// Remote distances may be off by this relative factor: the service
/// stores reduced-precision floats. Lower bounds handed to the host for
/// order rechecking are widened by it.
const DISTANCE_RELATIVE_TOLERANCE: f64 = 0.05;

/// One merged result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanHit {
    pub heap_ref: HeapRef,
    /// Conservative lower bound on the true distance; the host rechecks
    /// ordering against the exact operator.
    pub distance_lower_bound: f64,
    /// Whether this hit came from the local buffer (exact distance)
    /// rather than the remote service.
    pub from_buffer: bool,
}

/// Runs rescans against one index.
pub struct Scanner<'a> {
    store: &'a PageStore,
    client: &'a dyn RemoteClient,
    source: &'a dyn TupleSource,
    config: &'a Config,
    cancel: Option<CancelToken>,
}

impl<'a> Scanner<'a> {
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
            cancel: None,
        }
    }

    /// Attach a cancellation token; the local page walk honors it
    /// between pages.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Start a scan ordered by distance to `query`, filtered by `keys`.
    pub async fn rescan(&self, query: &[f32], keys: &[ScanKey], top_k: u32) -> Result<Scan> {
        let static_meta = meta::snapshot_static_meta(self.store)?;
        if query.len() as u32 != static_meta.dimensions {
            return Err(IndexError::QueryDimensions {
                expected: static_meta.dimensions,
                actual: query.len() as u32,
            });
        }
        if top_k == 0 {
            return Ok(Scan::empty());
        }

        let buffer_meta = meta::snapshot_buffer_meta(self.store)?;
        let filter = build_filter(keys);
        let max_probe = self.config.max_fetched_vectors_for_liveness_check as usize;
        let pending = liveness::pending_checkpoints(self.store, &buffer_meta, max_probe)?;
        let probe_ids = liveness::probe_ids(&pending);

        let host = static_meta.host.as_str();
        let (matches, fetched) = tokio::join!(
            self.client.query(host, top_k, query, &filter),
            fetch_if_any(self.client, host, &probe_ids),
        );
        let matches = matches.map_err(IndexError::from)?;
        match fetched {
            Ok(fetched) => {
                liveness::advance_from_fetch(self.store, &pending, &fetched)?;
            }
            Err(error) => tracing::debug!(%error, "liveness fetch failed"),
        }

        // Re-snapshot: a successful probe just shrank the unready region
        // this scan has to walk.
        let buffer_meta = meta::snapshot_buffer_meta(self.store)?;

        let mut remote = VecDeque::with_capacity(matches.len());
        for m in matches {
            let heap_ref = HeapRef::from_vector_id(&m.id)?;
            remote.push_back((static_meta.metric.distance_from_score(m.score), heap_ref));
        }

        let unready = buffer_meta.unready_tuples();
        let max_scan = u64::from(self.config.max_buffer_scan);
        if unready > max_scan {
            tracing::warn!(
                unready,
                unflushed = buffer_meta.unflushed_tuples(),
                "buffer is too large: only {max_scan} of {unready} unready tuples will be \
                 scanned locally; consider flushing"
            );
        }

        let mut bloom = BloomFilter::with_capacity(unready.min(max_scan));
        let mut sort = BoundedSort::new(top_k as usize);
        let mut truncated = false;
        let mut scanned: u64 = 0;

        let mut skip = u16::from(buffer_meta.ready.checkpoint_no > 0);
        let mut next = Some(buffer_meta.ready.page);
        'pages: while let Some(blk) = next {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(IndexError::Cancelled);
            }
            let page = self.store.snapshot(blk)?;
            let view = BufferPageRef::new(&page);
            for index in skip..view.item_count() {
                if scanned >= max_scan {
                    truncated = true;
                    tracing::info!("reached max buffer scan");
                    break 'pages;
                }
                let heap_ref = view.item(index);
                bloom.insert(heap_ref);
                scanned += 1;
                if let Some(vector) = self.source.vector(heap_ref)? {
                    sort.push(static_meta.metric.distance(&vector, query), heap_ref);
                }
            }
            skip = 0;
            next = view.opaque().next_page;
        }

        Ok(Scan {
            remote,
            local: sort.into_sorted().into(),
            bloom: Some(bloom),
            truncated_local_scan: truncated,
        })
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

/// Merged result stream, distance ascending.
#[derive(Debug)]
pub struct Scan {
    remote: VecDeque<(f64, HeapRef)>,
    local: VecDeque<(f64, HeapRef)>,
    bloom: Option<BloomFilter>,
    /// The unready region exceeded `max_buffer_scan`; tuples past the cap
    /// were not considered.
    pub truncated_local_scan: bool,
}

impl Scan {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            remote: VecDeque::new(),
            local: VecDeque::new(),
            bloom: None,
            truncated_local_scan: false,
        }
    }

    fn skip_remote_duplicates(&mut self) {
        let Some(bloom) = &self.bloom else { return };
        while let Some((_, heap_ref)) = self.remote.front() {
            if bloom.contains(*heap_ref) {
                tracing::debug!(
                    heap_ref = %heap_ref,
                    "skipping remote match also present in the local buffer"
                );
                self.remote.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Iterator for Scan {
    type Item = ScanHit;

    fn next(&mut self) -> Option<ScanHit> {
        self.skip_remote_duplicates();

        let local = self.local.front().copied();
        let remote = self.remote.front().copied();
        let (distance, heap_ref, from_buffer) = match (local, remote) {
            (None, None) => return None,
            (Some((d, h)), None) => (d, h, true),
            (None, Some((d, h))) => (d, h, false),
            // The local distance is exact, so it wins ties.
            (Some((ld, lh)), Some((rd, _))) if ld <= rd => (ld, lh, true),
            (_, Some((rd, rh))) => (rd, rh, false),
        };
        if from_buffer {
            self.local.pop_front();
        } else {
            self.remote.pop_front();
        }

        let distance_lower_bound = if distance > 0.0 {
            distance * (1.0 - DISTANCE_RELATIVE_TOLERANCE)
        } else {
            distance * (1.0 + DISTANCE_RELATIVE_TOLERANCE)
        };
        Some(ScanHit {
            heap_ref,
            distance_lower_bound,
            from_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_with(remote: Vec<(f64, HeapRef)>, local: Vec<(f64, HeapRef)>) -> Scan {
        Scan {
            remote: remote.into(),
            local: local.into(),
            bloom: Some(BloomFilter::with_capacity(16)),
            truncated_local_scan: false,
        }
    }

    #[test]
    fn merge_yields_distance_order() {
        let scan = scan_with(
            vec![(0.15, HeapRef::new(10, 1)), (0.25, HeapRef::new(11, 1))],
            vec![(0.1, HeapRef::new(1, 1)), (0.2, HeapRef::new(2, 1))],
        );
        let refs: Vec<HeapRef> = scan.map(|hit| hit.heap_ref).collect();
        assert_eq!(
            refs,
            vec![
                HeapRef::new(1, 1),
                HeapRef::new(10, 1),
                HeapRef::new(2, 1),
                HeapRef::new(11, 1),
            ]
        );
    }

    #[test]
    fn bloom_suppresses_remote_duplicates() {
        let mut scan = scan_with(
            vec![(0.10, HeapRef::new(1, 1)), (0.15, HeapRef::new(10, 1))],
            vec![(0.1, HeapRef::new(1, 1))],
        );
        scan.bloom.as_mut().unwrap().insert(HeapRef::new(1, 1));
        let hits: Vec<ScanHit> = scan.collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].heap_ref, HeapRef::new(1, 1));
        assert!(hits[0].from_buffer);
        assert_eq!(hits[1].heap_ref, HeapRef::new(10, 1));
        assert!(!hits[1].from_buffer);
    }

    #[test]
    fn lower_bound_is_relative() {
        let scan = scan_with(vec![], vec![(1.0, HeapRef::new(1, 1))]);
        let hit = scan.into_iter().next().unwrap();
        assert!((hit.distance_lower_bound - 0.95).abs() < 1e-9);
    }

    #[test]
    fn negative_distances_widen_downward() {
        // Inner-product distances are negative for similar vectors.
        let scan = scan_with(vec![(-2.0, HeapRef::new(1, 1))], vec![]);
        let hit = scan.into_iter().next().unwrap();
        assert!((hit.distance_lower_bound - (-2.1)).abs() < 1e-9);
    }

    #[test]
    fn empty_scan_yields_nothing() {
        assert_eq!(Scan::empty().count(), 0);
    }
}
