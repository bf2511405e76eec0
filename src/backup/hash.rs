//! Fingerprint stage: fills payload bytes and MD5 sums.

use std::fs::File;
use std::os::unix::fs::FileExt;

use anyhow::{bail, format_err, Error};
use log::warn;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::chunk::{md5_hex, Chunk};

/// For every incoming descriptor read the payload bytes at the recorded
/// offset and fingerprint them; symlinks get their target resolved and are
/// fingerprinted over the source path instead, yielding a link specific
/// key. A file that can no longer be opened (vanished since the walk) is
/// logged and skipped; a short read is fatal.
pub fn hash_chunks(mut rx: Receiver<Chunk>, tx: Sender<Chunk>) -> Result<(), Error> {
    while let Some(mut chunk) = rx.blocking_recv() {
        if chunk.is_symlink() {
            let target = std::fs::read_link(&chunk.path)
                .map_err(|err| format_err!("failed to read link {} - {}", chunk.path, err))?;
            chunk.link_target = match target.into_os_string().into_string() {
                Ok(target) => target,
                Err(target) => bail!("link target of {} is not valid UTF-8: {:?}", chunk.path, target),
            };
            chunk.fingerprint = md5_hex(chunk.path.as_bytes());
        } else {
            let file = match File::open(&chunk.path) {
                Ok(file) => file,
                Err(err) => {
                    warn!("couldn't open {}, skipping it - {}", chunk.path, err);
                    continue;
                }
            };
            file.read_exact_at(&mut chunk.payload, chunk.offset)
                .map_err(|err| format_err!("read of {} at offset {} failed - {}", chunk.path, chunk.offset, err))?;
            chunk.fingerprint = md5_hex(&chunk.payload);
        }
        if tx.blocking_send(chunk).is_err() {
            break;
        }
    }
    Ok(())
}
