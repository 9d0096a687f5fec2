//! Advancing the ready checkpoint from fetch-by-id probes.
//!
//! The only primitive the remote service offers for "is this vector
//! indexed yet" is fetching it by id. Because the service indexes in
//! insertion order, the presence of a checkpoint's representative proves
//! every older checkpoint's tuples are searchable too, so the probe picks
//! the newest fetched representative. A service that violates the
//! ordering only delays Ready; it never advances it wrongly.

use rustc_hash::FxHashSet;

use crate::buffer::meta::{self, BufferError};
use crate::page::layout::{BufferMeta, BufferPageRef, Checkpoint};
use crate::page::store::PageStore;
use crate::page::StorageError;

/// Checkpoints whose representatives are worth probing: everything in
/// `(ready, flush]`, newest first, capped at `max_probe`.
///
/// Walks the `prev_checkpoint_blkno` chain starting at the flush
/// checkpoint's page. When the backlog exceeds the cap, the newest
/// `max_probe` checkpoints are kept and a warning is logged: the remote
/// service is not keeping up with insertion.
pub fn pending_checkpoints(
    store: &PageStore,
    buffer_meta: &BufferMeta,
    max_probe: usize,
) -> Result<Vec<Checkpoint>, BufferError> {
    let backlog = buffer_meta.flush.checkpoint_no - buffer_meta.ready.checkpoint_no;
    if backlog as usize > max_probe {
        tracing::warn!(
            backlog,
            max_probe,
            "remote indexing is more than {max_probe} checkpoints behind what has been flushed"
        );
    }

    let mut pending = Vec::new();
    let mut cursor = buffer_meta.flush;
    while cursor.checkpoint_no > buffer_meta.ready.checkpoint_no && pending.len() < max_probe {
        pending.push(cursor);
        if cursor.checkpoint_no == buffer_meta.ready.checkpoint_no + 1 {
            break;
        }
        let page = store.snapshot(cursor.page)?;
        let prev_blk = BufferPageRef::new(&page)
            .opaque()
            .prev_checkpoint
            .ok_or_else(|| StorageError::InvalidPage {
                blk: cursor.page,
                what: "checkpoint page has no previous-checkpoint pointer".into(),
            })?;
        let prev_page = store.snapshot(prev_blk)?;
        cursor = BufferPageRef::new(&prev_page)
            .opaque()
            .checkpoint
            .ok_or_else(|| StorageError::InvalidPage {
                blk: prev_blk,
                what: "previous-checkpoint pointer targets a non-checkpoint page".into(),
            })?;
    }
    Ok(pending)
}

/// Pick the newest pending checkpoint whose representative the service
/// returned, and persist the Ready advance. Returns the new ready
/// checkpoint number, or `None` when no representative was present.
pub fn advance_from_fetch(
    store: &PageStore,
    pending: &[Checkpoint],
    fetched: &FxHashSet<String>,
) -> Result<Option<u32>, BufferError> {
    // `pending` is newest first; the first hit is the best checkpoint.
    for checkpoint in pending {
        let Some(id) = checkpoint.representative_id() else {
            continue;
        };
        if fetched.contains(&id) {
            meta::advance_ready(store, checkpoint)?;
            tracing::debug!(
                checkpoint = checkpoint.checkpoint_no,
                "liveness probe advanced ready checkpoint"
            );
            return Ok(Some(checkpoint.checkpoint_no));
        }
    }
    Ok(None)
}

/// Representative ids of `pending`, in probe order.
#[must_use]
pub fn probe_ids(pending: &[Checkpoint]) -> Vec<String> {
    pending
        .iter()
        .filter_map(Checkpoint::representative_id)
        .collect()
}
