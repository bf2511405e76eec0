//! Rebuilds the set of fingerprints already present in the bucket.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Error;
use futures::TryStreamExt;
use tokio::sync::mpsc;

use crate::store::BlobStore;

/// Chunk keys are lowercase hex, so one listing worker per possible first
/// character covers the whole bucket. Each worker stops at the first key
/// outside its shard: the listing API treats the prefix as a hint on some
/// page cursors, and given lexicographic order the early stop keeps shards
/// disjoint. Manifest keys start with `/` and are never visited.
pub async fn known_fingerprints(store: Arc<dyn BlobStore>) -> Result<HashSet<String>, Error> {
    let (tx, mut rx) = mpsc::channel(256);

    let mut workers = Vec::new();
    for prefix in "0123456789abcdef".chars() {
        let store = Arc::clone(&store);
        let tx = tx.clone();
        workers.push(tokio::spawn(async move {
            let mut keys = store.list_prefix(&prefix.to_string()).await?;
            while let Some(key) = keys.try_next().await? {
                if !key.starts_with(prefix) {
                    break;
                }
                if tx.send(key).await.is_err() {
                    break;
                }
            }
            Ok::<_, Error>(())
        }));
    }
    drop(tx);

    let mut known = HashSet::new();
    while let Some(key) = rx.recv().await {
        known.insert(key);
    }
    for worker in workers {
        worker.await??;
    }
    Ok(known)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::md5_hex;
    use crate::store::{BlobWrite, KeyStream, MemoryStore};
    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio::io::AsyncRead;

    #[tokio::test]
    async fn union_of_all_shards() -> Result<(), Error> {
        let store = MemoryStore::new();
        let mut expected = HashSet::new();
        for i in 0..64u32 {
            let fingerprint = md5_hex(&i.to_le_bytes());
            store
                .put_if_absent(&fingerprint, b"x", "application/octet-stream")
                .await?;
            expected.insert(fingerprint);
        }
        // manifests must not end up in the dedup set
        store
            .put_if_absent("/metadata/host/2026-01-01@12:00/backup.json", b"{}", "application/json")
            .await?;

        let known = known_fingerprints(Arc::new(store)).await?;
        assert_eq!(known, expected);
        Ok(())
    }

    /// A store whose prefix listing is only a start marker: it keeps
    /// returning keys past the prefix, like a paginated backend on an
    /// unlucky cursor. The early stop has to keep the shards disjoint.
    struct LooseListing(MemoryStore);

    #[async_trait]
    impl BlobStore for LooseListing {
        async fn head(&self, key: &str) -> Result<bool, Error> {
            self.0.head(key).await
        }
        async fn put_if_absent(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), Error> {
            self.0.put_if_absent(key, data, content_type).await
        }
        async fn read_all(&self, key: &str) -> Result<Vec<u8>, Error> {
            self.0.read_all(key).await
        }
        async fn open_read(&self, key: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, Error> {
            self.0.open_read(key).await
        }
        async fn open_write(&self, key: &str, content_type: &str) -> Result<Box<dyn BlobWrite>, Error> {
            self.0.open_write(key, content_type).await
        }
        async fn list_prefix(&self, prefix: &str) -> Result<KeyStream, Error> {
            let prefix = prefix.to_owned();
            let keys: Vec<_> = self
                .0
                .keys()
                .into_iter()
                .filter(move |key| key.as_str() >= prefix.as_str())
                .map(Ok)
                .collect();
            Ok(futures::stream::iter(keys).boxed())
        }
        async fn delete(&self, key: &str) -> Result<(), Error> {
            self.0.delete(key).await
        }
    }

    #[tokio::test]
    async fn early_stop_tolerates_loose_prefix_listing() -> Result<(), Error> {
        let inner = MemoryStore::new();
        let mut expected = HashSet::new();
        for i in 0..64u32 {
            let fingerprint = md5_hex(&i.to_le_bytes());
            inner
                .put_if_absent(&fingerprint, b"x", "application/octet-stream")
                .await?;
            expected.insert(fingerprint);
        }

        let known = known_fingerprints(Arc::new(LooseListing(inner))).await?;
        assert_eq!(known, expected);
        Ok(())
    }
}
