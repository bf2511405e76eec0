//! Object store access layer.
//!
//! Everything above this module only sees the [`BlobStore`] trait: keyed
//! blobs under one bucket with head/get/put/list/delete plus streaming
//! variants for manifests. The production backend talks to the Google Cloud
//! Storage JSON API; the in-memory backend backs the test suite.

use anyhow::Error;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

mod gcs;
mod memory;

pub use gcs::{Credentials, GcsStore};
pub use memory::MemoryStore;

pub type KeyStream = BoxStream<'static, Result<String, Error>>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Check whether `key` is present in the bucket.
    async fn head(&self, key: &str) -> Result<bool, Error>;

    /// Upload `data` under `key` unless the key is already present; an
    /// existing blob counts as success and is left untouched.
    async fn put_if_absent(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), Error>;

    async fn read_all(&self, key: &str) -> Result<Vec<u8>, Error>;

    async fn open_read(&self, key: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, Error>;

    async fn open_write(&self, key: &str, content_type: &str) -> Result<Box<dyn BlobWrite>, Error>;

    /// All keys starting with `prefix`, in lexicographic order. Pagination
    /// of the underlying listing API is handled internally.
    async fn list_prefix(&self, prefix: &str) -> Result<KeyStream, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;
}

/// Streaming blob writer. Nothing becomes visible in the bucket before
/// `finish` returns, and `finish` consumes the writer, so a blob is
/// finalized exactly once.
#[async_trait]
pub trait BlobWrite: Send {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), Error>;

    async fn finish(self: Box<Self>) -> Result<(), Error>;
}
