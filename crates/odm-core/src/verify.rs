//! Post-transfer integrity: streaming SHA-256 plus optional comparison
//! against a remote-provided validator.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// Compute SHA-256 of a file as lowercase hex, in one streaming pass.
pub fn sha256_path(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// If a strong ETag is a bare hex SHA-256 digest, normalize it for
/// comparison; weak validators and opaque tags yield `None`.
pub fn etag_digest(etag: &str) -> Option<String> {
    let tag = etag.trim().trim_matches('"');
    if tag.starts_with("W/") {
        return None;
    }
    if tag.len() == 64 && tag.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(tag.to_ascii_lowercase());
    }
    None
}

/// Outcome of verifying a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Hash computed; any known validator matched.
    Ok { sha256: String, size: u64 },
    /// On-disk size differs from the advertised length.
    SizeMismatch { expected: u64, actual: u64 },
    /// Digest differs from a known validator.
    DigestMismatch { expected: String, actual: String },
}

/// Verify the completed artifact at `path`: size check against
/// `expected_len` when known, then streaming SHA-256, compared to the
/// validator when it encodes a digest we understand.
pub fn verify_artifact(
    path: &Path,
    expected_len: Option<u64>,
    validator: Option<&str>,
) -> Result<VerifyOutcome> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    if let Some(expected) = expected_len {
        if size != expected {
            return Ok(VerifyOutcome::SizeMismatch {
                expected,
                actual: size,
            });
        }
    }
    let sha256 = sha256_path(path)?;
    if let Some(expected) = validator.and_then(etag_digest) {
        if expected != sha256 {
            return Ok(VerifyOutcome::DigestMismatch {
                expected,
                actual: sha256,
            });
        }
    }
    Ok(VerifyOutcome::Ok { sha256, size })
}
