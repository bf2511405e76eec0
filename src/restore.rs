//! Reassembles files from their manifest chunk sets.

use std::collections::HashSet;
use std::fs::{DirBuilder, OpenOptions, Permissions};
use std::os::unix::fs::{symlink, DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, format_err, Error};
use futures::{StreamExt, TryStreamExt};
use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::{chown, Gid, Uid};
use thiserror::Error as ThisError;

use crate::chunk::Chunk;
use crate::store::BlobStore;

/// Width of the pool used for directory restores.
pub const RESTORE_WORKERS: usize = 50;

/// Integrity failures of a single file's chunk set.
#[derive(Debug, ThisError)]
pub enum ChunkSetError {
    #[error("chunk from file {found} while restoring {expected}")]
    PathMismatch { expected: String, found: String },
    #[error("mismatched sizes in chunk set for {path}: {found} vs {expected}")]
    SizeMismatch { path: String, expected: u64, found: u64 },
    #[error("duplicate offset {offset} in chunk set for {path}")]
    DuplicateOffset { path: String, offset: u64 },
    #[error("missing chunks for {path}: got {got} of {expected} bytes")]
    Coverage { path: String, got: u64, expected: u64 },
}

pub struct Restorer {
    store: Arc<dyn BlobStore>,
    root: PathBuf,
    chown: bool,
}

impl Restorer {
    /// Restore into the current working directory (the CLI behavior).
    pub fn new(store: Arc<dyn BlobStore>, chown: bool) -> Self {
        Self::with_root(store, ".", chown)
    }

    pub fn with_root(store: Arc<dyn BlobStore>, root: impl Into<PathBuf>, chown: bool) -> Self {
        Self {
            store,
            root: root.into(),
            chown,
        }
    }

    /// Validate a file's chunk set, download every chunk, write the payloads
    /// at their recorded offsets and apply the recorded metadata. Refuses to
    /// overwrite an existing target.
    pub async fn restore_file(&self, chunks: &[Chunk]) -> Result<(), Error> {
        let first = match chunks.first() {
            Some(first) => first,
            None => bail!("empty chunk set"),
        };

        let mut offsets = HashSet::new();
        let mut fetched = Vec::with_capacity(chunks.len());
        let mut got = 0u64;
        for chunk in chunks {
            if chunk.path != first.path {
                bail!(ChunkSetError::PathMismatch {
                    expected: first.path.clone(),
                    found: chunk.path.clone(),
                });
            }
            if chunk.file_size != first.file_size {
                bail!(ChunkSetError::SizeMismatch {
                    path: first.path.clone(),
                    expected: first.file_size,
                    found: chunk.file_size,
                });
            }
            if !offsets.insert(chunk.offset) {
                bail!(ChunkSetError::DuplicateOffset {
                    path: first.path.clone(),
                    offset: chunk.offset,
                });
            }
            let data = self.store.read_all(&chunk.fingerprint).await?;
            got += data.len() as u64;
            fetched.push((chunk.offset, data));
        }

        let relative = first
            .path
            .strip_prefix('/')
            .ok_or_else(|| format_err!("path does not start with '/': {}", first.path))?;
        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o777)
                .create(parent)
                .map_err(|err| format_err!("unable to create {:?} - {}", parent, err))?;
        }

        if !first.link_target.is_empty() {
            // symlink blobs carry no body; chmod/chown/utime on the link
            // would dereference it, so metadata stays untouched
            symlink(&first.link_target, &target)
                .map_err(|err| format_err!("error symlinking {:?} -> {} - {}", target, first.link_target, err))?;
            return Ok(());
        }

        if got != first.file_size {
            bail!(ChunkSetError::Coverage {
                path: first.path.clone(),
                got,
                expected: first.file_size,
            });
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o777)
            .open(&target)
            .map_err(|err| format_err!("error opening {:?} - {}", target, err))?;
        for (offset, data) in &fetched {
            file.write_all_at(data, *offset)
                .map_err(|err| format_err!("error writing to {:?} - {}", target, err))?;
        }
        drop(file);

        // metadata strictly after the body: a read-only recorded mode must
        // not block the remaining positioned writes
        std::fs::set_permissions(&target, Permissions::from_mode(first.mode_bits()))
            .map_err(|err| format_err!("error chmod'ing {:?} - {}", target, err))?;
        if self.chown {
            chown(&target, Some(Uid::from_raw(first.uid)), Some(Gid::from_raw(first.gid)))
                .map_err(|err| format_err!("error chowning {:?} - {}", target, err))?;
        }
        let mtime = TimeSpec::from(libc::timespec {
            tv_sec: first.mod_time.timestamp(),
            tv_nsec: first.mod_time.timestamp_subsec_nanos() as i64,
        });
        utimensat(None, &target, &mtime, &mtime, UtimensatFlags::FollowSymlink)
            .map_err(|err| format_err!("error setting times on {:?} - {}", target, err))?;

        Ok(())
    }

    /// Restore many files with a bounded worker pool.
    pub async fn restore_many(&self, files: Vec<Vec<Chunk>>) -> Result<(), Error> {
        futures::stream::iter(files)
            .map(Ok::<Vec<Chunk>, Error>)
            .try_for_each_concurrent(RESTORE_WORKERS, |chunks| async move {
                let path = chunks.first().map(|chunk| chunk.path.clone()).unwrap_or_default();
                self.restore_file(&chunks).await?;
                println!("restored {}", path);
                Ok(())
            })
            .await
    }
}
