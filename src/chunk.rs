//! The chunk descriptor exchanged by every pipeline stage and persisted as
//! one JSON record per line in backup manifests.

use anyhow::{format_err, Error};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::store::BlobStore;

/// Regular files are split at fixed 1 MiB boundaries.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Fingerprint placeholder on descriptors the hasher has not seen yet.
pub const UNHASHED: &str = "empty";

/// One slice of a regular file, or the single record standing in for a
/// symlink. All descriptors of a file repeat its metadata; `payload` only
/// lives between the walker and the progress stage and is never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "FileSize")]
    pub file_size: u64,
    #[serde(rename = "FileModTime")]
    pub mod_time: DateTime<Utc>,
    /// Full `st_mode`, so the file type bits identify symlinks.
    #[serde(rename = "FilePerm")]
    pub perm: u32,
    #[serde(rename = "Uid")]
    pub uid: u32,
    #[serde(rename = "Gid")]
    pub gid: u32,
    #[serde(rename = "Offset")]
    pub offset: u64,
    #[serde(rename = "Md5sum")]
    pub fingerprint: String,
    #[serde(rename = "LinkTarget")]
    pub link_target: String,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl Chunk {
    pub fn is_symlink(&self) -> bool {
        self.perm & (libc::S_IFMT as u32) == (libc::S_IFLNK as u32)
    }

    /// Permission bits without the file type part.
    pub fn mode_bits(&self) -> u32 {
        self.perm & 0o7777
    }
}

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Decode a manifest blob: one JSON record per line until end of stream.
pub async fn read_manifest(store: &dyn BlobStore, key: &str) -> Result<Vec<Chunk>, Error> {
    let reader = store.open_read(key).await?;
    let mut lines = BufReader::new(reader).lines();
    let mut chunks = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(&line)
            .map_err(|err| format_err!("bad manifest record in {} - {}", key, err))?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_known_vectors() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"a"), "0cc175b9c0f1b6a831c399e269772661");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn record_field_names() {
        let chunk = Chunk {
            path: "/etc/hosts".to_string(),
            file_size: 42,
            mod_time: Utc::now(),
            perm: 0o100644,
            uid: 1000,
            gid: 1000,
            offset: 0,
            fingerprint: md5_hex(b"a"),
            link_target: String::new(),
            payload: vec![1, 2, 3],
        };

        let value: serde_json::Value = serde_json::from_str(&serde_json::to_string(&chunk).unwrap()).unwrap();
        for field in &[
            "Path", "FileSize", "FileModTime", "FilePerm", "Uid", "Gid", "Offset", "Md5sum", "LinkTarget",
        ] {
            assert!(value.get(*field).is_some(), "missing field {}", field);
        }
        // the payload never reaches the manifest
        assert!(value.get("payload").is_none());

        let decoded: Chunk = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.path, chunk.path);
        assert_eq!(decoded.mod_time, chunk.mod_time);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn symlink_mode_detection() {
        let mut chunk = Chunk {
            path: "/x".to_string(),
            file_size: 0,
            mod_time: Utc::now(),
            perm: 0o120777,
            uid: 0,
            gid: 0,
            offset: 0,
            fingerprint: UNHASHED.to_string(),
            link_target: String::new(),
            payload: Vec::new(),
        };
        assert!(chunk.is_symlink());
        chunk.perm = 0o100444;
        assert!(!chunk.is_symlink());
        assert_eq!(chunk.mode_bits(), 0o444);
    }
}
