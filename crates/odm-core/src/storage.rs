//! Partial-file I/O.
//!
//! Strategies write into `<dest>.part` at absolute offsets (pwrite-style),
//! fsync before the corresponding bitmap bits are persisted, and never touch
//! the final path; the sidecar store performs the atomic rename at commit.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Suffix of the working file next to the destination.
pub const PART_SUFFIX: &str = ".part";

/// Path of the working file: appends `.part` to the destination path.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut o = dest.as_os_str().to_owned();
    o.push(PART_SUFFIX);
    PathBuf::from(o)
}

/// Writer over a `.part` file supporting offset writes and explicit fsync.
#[derive(Clone)]
pub struct PartWriter {
    file: Arc<File>,
}

impl PartWriter {
    /// Open the part file, creating it empty if missing. Never truncates, so
    /// resumed progress survives.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("open part file: {}", path.display()))?;
        Ok(PartWriter {
            file: Arc::new(file),
        })
    }

    /// Reserve `size` bytes for the part file. Offset writes and holes need
    /// the full length to exist up front; real block allocation (Unix
    /// `posix_fallocate`) is preferred, and a filesystem that refuses gets a
    /// plain logical extension instead.
    pub fn preallocate(&self, size: u64) -> Result<()> {
        #[cfg(unix)]
        {
            let rc =
                unsafe { libc::posix_fallocate(self.file.as_raw_fd(), 0, size as libc::off_t) };
            if rc == 0 {
                return Ok(());
            }
            tracing::debug!(rc, size, "fallocate refused, extending file instead");
        }
        self.file.set_len(size).context("extend part file")?;
        Ok(())
    }

    /// Discard all progress: truncate to zero length. Used on validator
    /// change and integrity reset.
    pub fn truncate(&self) -> Result<()> {
        self.truncate_to(0)
    }

    /// Cut the file down to `len` bytes. Used before handing the part to the
    /// external tool, which resumes by appending at the file's end.
    pub fn truncate_to(&self, len: u64) -> Result<()> {
        self.file.set_len(len).context("truncate part file")?;
        self.file.sync_all().context("sync after truncate")?;
        Ok(())
    }

    /// Write `data` at `offset` without moving any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    /// Non-Unix fallback: seek + write on a cloned handle.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    /// Sync file data to disk. Must run before bitmap bits are persisted.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("sync part file")
    }

    /// Current on-disk length.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().context("stat part file")?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/data/resource.csv")).to_string_lossy(),
            "/data/resource.csv.part"
        );
    }

    #[test]
    fn open_preallocate_write_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.part");
        let w = PartWriter::open(&p).unwrap();
        w.preallocate(64).unwrap();
        w.write_at(0, b"head").unwrap();
        w.write_at(60, b"tail").unwrap();
        w.sync().unwrap();
        drop(w);

        // Reopen must preserve content (no truncation).
        let w2 = PartWriter::open(&p).unwrap();
        assert_eq!(w2.len().unwrap(), 64);
        let mut buf = vec![0u8; 64];
        let mut f = File::open(&p).unwrap();
        f.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[0..4], b"head");
        assert_eq!(&buf[60..64], b"tail");
    }

    #[test]
    fn truncate_discards_progress() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.part");
        let w = PartWriter::open(&p).unwrap();
        w.write_at(0, b"data").unwrap();
        w.truncate().unwrap();
        assert_eq!(w.len().unwrap(), 0);
    }
}
