//! Atomic file persistence: temp + fsync + rename for documents, fsynced
//! single-line appends for NDJSON record files. These are the only two write
//! modalities for persistent state; record files are never rewritten in place.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Suffix for the sibling temp file used by [`write_atomic`].
const TMP_SUFFIX: &str = ".tmp";

fn tmp_path(path: &Path) -> PathBuf {
    let mut o = path.as_os_str().to_owned();
    o.push(TMP_SUFFIX);
    PathBuf::from(o)
}

/// Create `dir` and all missing parents.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))
}

/// Fsync the directory containing `path` so a rename survives a crash.
fn sync_parent_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        let dir = File::open(parent)
            .with_context(|| format!("open dir for sync: {}", parent.display()))?;
        dir.sync_all()
            .with_context(|| format!("sync dir: {}", parent.display()))?;
    }
    Ok(())
}

/// Write `bytes` to `path` atomically: sibling `.tmp` in the same directory,
/// fsync the file, rename over the target, fsync the directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = tmp_path(path);
    let mut f =
        File::create(&tmp).with_context(|| format!("create temp file: {}", tmp.display()))?;
    f.write_all(bytes)
        .with_context(|| format!("write temp file: {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("sync temp file: {}", tmp.display()))?;
    drop(f);
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
    sync_parent_dir(path)
}

/// Append one complete record to an NDJSON file: newline-terminated, fsynced.
/// `line` must not contain a newline.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    debug_assert!(!line.contains('\n'));
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open for append: {}", path.display()))?;
    f.write_all(line.as_bytes())
        .and_then(|_| f.write_all(b"\n"))
        .with_context(|| format!("append: {}", path.display()))?;
    f.sync_all()
        .with_context(|| format!("sync after append: {}", path.display()))?;
    Ok(())
}
