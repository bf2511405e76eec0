//! Byte progress rendering.

use std::io::Write;

use crate::chunk::Chunk;
use crate::tools::HumanByte;

/// Tallies completed bytes against a precomputed total and releases each
/// chunk's payload, bounding pipeline memory to the chunks in flight.
pub struct Progress {
    total: Option<u64>,
    done: u64,
}

impl Progress {
    /// `total` is the `du` estimate; without one the meter renders a plain
    /// byte counter.
    pub fn new(total: Option<u64>) -> Self {
        Self { total, done: 0 }
    }

    pub fn update(&mut self, chunk: &mut Chunk) {
        self.done += chunk.payload.len() as u64;
        chunk.payload = Vec::new();
        self.render();
    }

    pub fn done_bytes(&self) -> u64 {
        self.done
    }

    fn render(&self) {
        match self.total {
            Some(total) if total > 0 => {
                let percent = 100.0 * (self.done as f64) / (total as f64);
                print!(
                    "\rFinished {} of {} ({:.2}%)",
                    HumanByte::from(self.done),
                    HumanByte::from(total),
                    percent
                );
            }
            _ => print!("\rFinished {}", HumanByte::from(self.done)),
        }
        let _ = std::io::stdout().flush();
    }

    pub fn finish(&self) {
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn counts_and_releases_payloads() {
        let mut progress = Progress::new(Some(100));
        let mut chunk = Chunk {
            path: "/data".to_string(),
            file_size: 70,
            mod_time: Utc::now(),
            perm: 0o100644,
            uid: 0,
            gid: 0,
            offset: 0,
            fingerprint: String::new(),
            link_target: String::new(),
            payload: vec![0u8; 30],
        };
        progress.update(&mut chunk);
        assert!(chunk.payload.is_empty());
        assert_eq!(progress.done_bytes(), 30);

        chunk.payload = vec![0u8; 40];
        progress.update(&mut chunk);
        assert_eq!(progress.done_bytes(), 70);
    }
}
