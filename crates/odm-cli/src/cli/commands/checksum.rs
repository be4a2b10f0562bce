//! `odm checksum <path>` – SHA-256 of a local file.

use anyhow::Result;
use odm_core::verify;
use std::path::Path;

pub fn run_checksum(path: &Path) -> Result<()> {
    let digest = verify::sha256_path(path)?;
    println!("{digest}  {}", path.display());
    Ok(())
}
