//! Small helpers shared by the backup and restore paths.

use std::process::Command;

use anyhow::{format_err, Error};
use log::warn;

/// Render a byte count with binary units, two decimals.
pub struct HumanByte {
    b: u64,
}

impl From<u64> for HumanByte {
    fn from(v: u64) -> Self {
        HumanByte { b: v }
    }
}

impl std::fmt::Display for HumanByte {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.b < 1024 {
            return write!(f, "{} B", self.b);
        }
        let mut v = (self.b as f64) / 1024.0;
        for unit in &["KiB", "MiB", "GiB"] {
            if v < 1024.0 {
                return write!(f, "{:.2} {}", v, unit);
            }
            v /= 1024.0;
        }
        write!(f, "{:.2} TiB", v)
    }
}

/// Total size of the given trees as reported by `du -sb`, summed over all
/// roots. Best effort: on any failure the caller gets `None` and the
/// progress meter runs without a denominator.
pub fn disk_usage(roots: &[String]) -> Option<u64> {
    let mut total = 0u64;
    for root in roots {
        let output = match Command::new("du").arg("-sb").arg(root).output() {
            Ok(output) => output,
            Err(err) => {
                warn!("unable to run du - {}", err);
                return None;
            }
        };
        if !output.status.success() {
            warn!("du -sb {} failed", root);
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        match text.split('\t').next().and_then(|s| s.trim().parse::<u64>().ok()) {
            Some(bytes) => total += bytes,
            None => {
                warn!("unable to parse du output for {}", root);
                return None;
            }
        }
    }
    Some(total)
}

pub fn hostname() -> Result<String, Error> {
    let mut buf = [0u8; 256];
    let name = nix::unistd::gethostname(&mut buf)
        .map_err(|err| format_err!("unable to read hostname - {}", err))?;
    Ok(name.to_str()?.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_byte_units() {
        assert_eq!(HumanByte::from(0).to_string(), "0 B");
        assert_eq!(HumanByte::from(1023).to_string(), "1023 B");
        assert_eq!(HumanByte::from(1024).to_string(), "1.00 KiB");
        assert_eq!(HumanByte::from(1536).to_string(), "1.50 KiB");
        assert_eq!(HumanByte::from(1024 * 1024).to_string(), "1.00 MiB");
        assert_eq!(HumanByte::from(5 * 1024 * 1024 * 1024).to_string(), "5.00 GiB");
    }
}
