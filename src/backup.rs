//! The deduplicating backup pipeline.
//!
//! walk -> hash -> dedup filter -> upload pool -> merge -> progress ->
//! manifest. Stages run as independent tasks joined by bounded channels;
//! the walker and hasher do blocking filesystem work and run on blocking
//! threads. The manifest is finalized only after every stage reported
//! success, so a failed backup leaves no manifest behind.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Error};
use log::info;
use tokio::sync::mpsc;
use tokio::task;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::store::BlobStore;
use crate::tools;

mod filter;
mod hash;
mod known;
mod progress;
mod upload;
mod walk;

pub use filter::filter_chunks;
pub use known::known_fingerprints;
pub use progress::Progress;
pub use upload::upload_chunks;
pub use walk::walk_roots;

pub(crate) const CHANNEL_DEPTH: usize = 16;

/// Width of the upload worker pool.
pub const UPLOAD_WORKERS: usize = 50;

/// Back up all trees below `roots` into the store, returning the key of the
/// manifest that was written.
pub async fn run_backup(store: Arc<dyn BlobStore>, roots: Vec<String>) -> Result<String, Error> {
    for root in &roots {
        if !root.starts_with('/') {
            bail!("backup root '{}' is not absolute", root);
        }
    }

    let total = tools::disk_usage(&roots);
    let known = known_fingerprints(Arc::clone(&store)).await?;
    info!("{} chunks already present in the bucket", known.len());

    let (walk_tx, walk_rx) = mpsc::channel(CHANNEL_DEPTH);
    let walk_paths: Vec<PathBuf> = roots.iter().map(PathBuf::from).collect();
    let walker = task::spawn_blocking(move || walk_roots(walk_paths, walk_tx));

    let (hash_tx, hash_rx) = mpsc::channel(CHANNEL_DEPTH);
    let hasher = task::spawn_blocking(move || hash::hash_chunks(walk_rx, hash_tx));

    let (new_rx, existing_rx) = filter_chunks(hash_rx, known);
    let (uploader, uploaded_rx) = upload_chunks(Arc::clone(&store), new_rx);

    let manifest_key = manifest_key()?;
    let mut manifest = store.open_write(&manifest_key, "application/json").await?;

    let mut progress = Progress::new(total);
    let mut merged = ReceiverStream::new(existing_rx).merge(ReceiverStream::new(uploaded_rx));
    while let Some(mut chunk) = merged.next().await {
        progress.update(&mut chunk);
        let mut record = serde_json::to_vec(&chunk)?;
        record.push(b'\n');
        manifest.write_all(&record).await?;
    }
    progress.finish();

    // A chunk only reaches the merged stream once it is durably stored, so
    // the stream ending means all uploads are done. Join the stages before
    // finalizing; the uploader is joined first since a failure there makes
    // the upstream stages stop early as well.
    uploader.await??;
    hasher.await??;
    walker.await??;

    manifest.finish().await?;
    info!("wrote manifest {}", manifest_key);
    Ok(manifest_key)
}

fn manifest_key() -> Result<String, Error> {
    let host = tools::hostname()?;
    let stamp = chrono::Local::now().format("%Y-%m-%d@%H:%M");
    Ok(format!("/metadata/{}/{}/backup.json", host, stamp))
}
