//! Routes fingerprinted chunks into "already present" and "new".

use std::collections::HashSet;

use tokio::sync::mpsc::{self, Receiver};

use crate::chunk::Chunk;

use super::CHANNEL_DEPTH;

/// Partition the hashed stream against the known fingerprint set. The set
/// is complete before the first chunk arrives and is never updated, so a
/// chunk appearing twice within one backup is uploaded twice; the store's
/// put-if-absent makes that harmless.
pub fn filter_chunks(mut rx: Receiver<Chunk>, known: HashSet<String>) -> (Receiver<Chunk>, Receiver<Chunk>) {
    let (new_tx, new_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (existing_tx, existing_rx) = mpsc::channel(CHANNEL_DEPTH);

    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            let tx = if known.contains(&chunk.fingerprint) {
                &existing_tx
            } else {
                &new_tx
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    (new_rx, existing_rx)
}
