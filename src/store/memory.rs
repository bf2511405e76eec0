//! In-process blob store, primarily for the test suite.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Error};
use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use tokio::io::AsyncRead;

use super::{BlobStore, BlobWrite, KeyStream};

struct Blob {
    content_type: String,
    data: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    blobs: Mutex<BTreeMap<String, Blob>>,
    writes: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blob bodies actually written. A `put_if_absent` hitting an
    /// existing key does not count, which lets tests assert that a repeated
    /// backup uploads nothing.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.blobs.lock().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.blobs.lock().unwrap().get(key).map(|blob| blob.data.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.inner.blobs.lock().unwrap().get(key).map(|blob| blob.content_type.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.blobs.lock().unwrap().keys().cloned().collect()
    }

    fn insert(&self, key: &str, data: Vec<u8>, content_type: &str) {
        let blob = Blob {
            content_type: content_type.to_owned(),
            data,
        };
        self.inner.blobs.lock().unwrap().insert(key.to_owned(), blob);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn head(&self, key: &str) -> Result<bool, Error> {
        Ok(self.contains(key))
    }

    async fn put_if_absent(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), Error> {
        if self.contains(key) {
            return Ok(());
        }
        self.insert(key, data.to_vec(), content_type);
        Ok(())
    }

    async fn read_all(&self, key: &str) -> Result<Vec<u8>, Error> {
        match self.get(key) {
            Some(data) => Ok(data),
            None => bail!("no such object '{}'", key),
        }
    }

    async fn open_read(&self, key: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, Error> {
        let data = self.read_all(key).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn open_write(&self, key: &str, content_type: &str) -> Result<Box<dyn BlobWrite>, Error> {
        Ok(Box::new(MemoryWriter {
            store: self.clone(),
            key: key.to_owned(),
            content_type: content_type.to_owned(),
            data: Vec::new(),
        }))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<KeyStream, Error> {
        let keys: Vec<_> = self
            .inner
            .blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(keys).boxed())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        match self.inner.blobs.lock().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => bail!("no such object '{}'", key),
        }
    }
}

struct MemoryWriter {
    store: MemoryStore,
    key: String,
    content_type: String,
    data: Vec<u8>,
}

#[async_trait]
impl BlobWrite for MemoryWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), Error> {
        self.store.insert(&self.key, self.data, &self.content_type);
        Ok(())
    }
}
