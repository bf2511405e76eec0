//! Chunk upload pool.

use std::sync::Arc;

use anyhow::{format_err, Error};
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc::{self, Receiver};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::chunk::Chunk;
use crate::store::BlobStore;

use super::{CHANNEL_DEPTH, UPLOAD_WORKERS};

/// Drain `rx` with a pool of [`UPLOAD_WORKERS`] concurrent uploads; every
/// chunk is forwarded downstream once its blob is durably stored. The
/// returned receiver closes when the pool has fully drained its input.
pub fn upload_chunks(
    store: Arc<dyn BlobStore>,
    rx: Receiver<Chunk>,
) -> (JoinHandle<Result<(), Error>>, Receiver<Chunk>) {
    let (tx, out) = mpsc::channel(CHANNEL_DEPTH);

    let handle = tokio::spawn(async move {
        ReceiverStream::new(rx)
            .map(Ok::<Chunk, Error>)
            .try_for_each_concurrent(UPLOAD_WORKERS, move |chunk| {
                let store = Arc::clone(&store);
                let tx = tx.clone();
                async move {
                    store
                        .put_if_absent(&chunk.fingerprint, &chunk.payload, "application/octet-stream")
                        .await?;
                    tx.send(chunk).await.map_err(|_| format_err!("merge channel closed"))?;
                    Ok(())
                }
            })
            .await
    });

    (handle, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::md5_hex;
    use chrono::Utc;

    fn chunk(data: &[u8], offset: u64) -> Chunk {
        Chunk {
            path: "/data".to_string(),
            file_size: 0,
            mod_time: Utc::now(),
            perm: 0o100644,
            uid: 0,
            gid: 0,
            offset,
            fingerprint: md5_hex(data),
            link_target: String::new(),
            payload: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn uploads_and_forwards_every_chunk() -> Result<(), Error> {
        let store = crate::store::MemoryStore::new();
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let (pool, mut uploaded) = upload_chunks(Arc::new(store.clone()), rx);

        let feeder = tokio::spawn(async move {
            for i in 0..100u64 {
                tx.send(chunk(format!("payload {}", i).as_bytes(), i)).await.unwrap();
            }
        });

        let mut forwarded = 0;
        while let Some(chunk) = uploaded.recv().await {
            assert_eq!(store.get(&chunk.fingerprint).unwrap(), chunk.payload);
            forwarded += 1;
        }
        feeder.await.unwrap();
        pool.await.unwrap()?;

        assert_eq!(forwarded, 100);
        assert_eq!(store.write_count(), 100);
        Ok(())
    }
}
