//! Directory walker emitting one descriptor per 1 MiB file slice and one
//! per symlink.

use std::collections::VecDeque;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use anyhow::{format_err, Error};
use chrono::{DateTime, Utc};
use log::warn;
use tokio::sync::mpsc::Sender;

use crate::chunk::{Chunk, CHUNK_SIZE, UNHASHED};

/// Breadth-first walk over all roots. A directory that cannot be opened is
/// logged and skipped; an entry error while reading an open directory is
/// fatal. Traversal order is unspecified.
pub fn walk_roots(roots: Vec<PathBuf>, tx: Sender<Chunk>) -> Result<(), Error> {
    let mut queue: VecDeque<PathBuf> = roots.into_iter().collect();

    while let Some(dir) = queue.pop_front() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("unable to open {:?}, skipping it - {}", dir, err);
                continue;
            }
        };
        for entry in entries {
            let entry = entry.map_err(|err| format_err!("reading directory {:?} failed - {}", dir, err))?;
            let metadata = entry
                .metadata()
                .map_err(|err| format_err!("stat of {:?} failed - {}", entry.path(), err))?;
            if metadata.is_dir() {
                queue.push_back(entry.path());
                continue;
            }
            let path = match entry.path().into_os_string().into_string() {
                Ok(path) => path,
                Err(path) => {
                    warn!("skipping non UTF-8 path {:?}", path);
                    continue;
                }
            };
            if !emit(&path, &metadata, &tx)? {
                // receiver gone, downstream decides how to report
                return Ok(());
            }
        }
    }
    Ok(())
}

fn emit(path: &str, metadata: &Metadata, tx: &Sender<Chunk>) -> Result<bool, Error> {
    let template = Chunk {
        path: path.to_owned(),
        file_size: metadata.len(),
        mod_time: DateTime::<Utc>::from(metadata.modified()?),
        perm: metadata.mode(),
        uid: metadata.uid(),
        gid: metadata.gid(),
        offset: 0,
        fingerprint: UNHASHED.to_owned(),
        link_target: String::new(),
        payload: Vec::new(),
    };

    if metadata.file_type().is_symlink() {
        // one payloadless descriptor; the hasher fills in the target
        return Ok(tx.blocking_send(template).is_ok());
    }

    let size = metadata.len();
    let mut offset = 0;
    while offset < size {
        let len = CHUNK_SIZE.min(size - offset);
        let mut chunk = template.clone();
        chunk.offset = offset;
        chunk.payload = vec![0u8; len as usize];
        if tx.blocking_send(chunk).is_err() {
            return Ok(false);
        }
        offset += CHUNK_SIZE;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn walk_to_vec(root: &std::path::Path) -> Vec<Chunk> {
        let (tx, mut rx) = mpsc::channel(1024);
        walk_roots(vec![root.to_path_buf()], tx).unwrap();
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn chunk_counts_at_size_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zero"), b"").unwrap();
        std::fs::write(dir.path().join("one"), b"x").unwrap();
        std::fs::write(dir.path().join("exact"), vec![7u8; CHUNK_SIZE as usize]).unwrap();
        std::fs::write(dir.path().join("spill"), vec![7u8; CHUNK_SIZE as usize + 1]).unwrap();

        let mut by_path: HashMap<String, Vec<Chunk>> = HashMap::new();
        for chunk in walk_to_vec(dir.path()) {
            by_path.entry(chunk.path.clone()).or_default().push(chunk);
        }

        let name = |n: &str| dir.path().join(n).to_str().unwrap().to_string();
        assert!(by_path.get(&name("zero")).is_none());
        assert_eq!(by_path[&name("one")].len(), 1);
        assert_eq!(by_path[&name("exact")].len(), 1);
        assert_eq!(by_path[&name("spill")].len(), 2);

        for chunk in &by_path[&name("one")] {
            assert_eq!(chunk.payload.len(), 1);
            assert_eq!(chunk.fingerprint, UNHASHED);
        }

        let mut offsets: Vec<u64> = by_path[&name("spill")].iter().map(|c| c.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![0, CHUNK_SIZE]);
        let covered: u64 = by_path[&name("spill")].iter().map(|c| c.payload.len() as u64).sum();
        assert_eq!(covered, CHUNK_SIZE + 1);
    }

    #[test]
    fn offsets_partition_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let size = 3 * CHUNK_SIZE + 5;
        std::fs::write(dir.path().join("big"), vec![1u8; size as usize]).unwrap();

        let chunks = walk_to_vec(dir.path());
        let mut offsets: Vec<u64> = chunks.iter().map(|c| c.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![0, CHUNK_SIZE, 2 * CHUNK_SIZE, 3 * CHUNK_SIZE]);
        for chunk in &chunks {
            assert_eq!(chunk.file_size, size);
            let expected = CHUNK_SIZE.min(size - chunk.offset);
            assert_eq!(chunk.payload.len() as u64, expected);
        }
    }

    #[test]
    fn symlinks_emit_one_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("/etc/hosts", dir.path().join("link")).unwrap();

        let chunks = walk_to_vec(dir.path());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_symlink());
        assert_eq!(chunks[0].offset, 0);
        assert!(chunks[0].payload.is_empty());
        assert!(chunks[0].link_target.is_empty());
    }

    #[test]
    fn subdirectories_are_descended() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/file"), b"data").unwrap();

        let chunks = walk_to_vec(dir.path());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].path.ends_with("/a/b/file"));
    }
}
