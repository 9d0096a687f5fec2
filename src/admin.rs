//! Administrative helpers: remote index housekeeping and a printable dump
//! of the local index state.

use crate::error::Result;
use crate::page::layout::{BUFFER_HEAD_BLKNO, BufferPageRef};
use crate::page::store::PageStore;
use crate::buffer::meta;
use crate::remote::RemoteClient;

/// Prefix of remote indexes this crate creates; housekeeping never
/// touches anything else.
const MANAGED_PREFIX: &str = "remora-";

/// Names of every index on the remote control plane.
pub async fn list_remote_indexes(client: &dyn RemoteClient) -> Result<Vec<String>> {
    Ok(client.list_indexes().await?)
}

/// Delete managed remote indexes that no local index references anymore.
/// Returns the names deleted.
pub async fn delete_unused_remote_indexes(
    client: &dyn RemoteClient,
    in_use: &[String],
) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in client.list_indexes().await? {
        if name.starts_with(MANAGED_PREFIX) && !in_use.contains(&name) {
            tracing::info!(%name, "deleting unused remote index");
            client.delete_index(&name).await?;
            deleted.push(name);
        }
    }
    Ok(deleted)
}

/// Render the static meta, the buffer meta and every buffer page's
/// opaque, for debugging and support.
pub fn print_index_state(store: &PageStore) -> Result<String> {
    use std::fmt::Write;

    let static_meta = meta::snapshot_static_meta(store)?;
    let buffer_meta = meta::snapshot_buffer_meta(store)?;
    let mut out = String::new();
    writeln!(
        out,
        "Static meta:\n{} dimensions, {} metric, host {}, index name {}",
        static_meta.dimensions, static_meta.metric, static_meta.host, static_meta.index_name
    )
    .expect("writing to a string");
    writeln!(out, "Buffer meta:\n{buffer_meta}").expect("writing to a string");

    for blk in BUFFER_HEAD_BLKNO..store.page_count() {
        let page = store.snapshot(blk)?;
        let view = BufferPageRef::new(&page);
        let opaque = view.opaque();
        let checkpoint = match opaque.checkpoint {
            Some(c) => format!("{c}"),
            None => "none".to_string(),
        };
        writeln!(
            out,
            "Page {blk}: {} items, next {}, prev_check {}, check {checkpoint}",
            view.item_count(),
            opaque
                .next_page
                .map_or_else(|| "none".to_string(), |b| b.to_string()),
            opaque
                .prev_checkpoint
                .map_or_else(|| "none".to_string(), |b| b.to_string()),
        )
        .expect("writing to a string");
    }
    Ok(out)
}
