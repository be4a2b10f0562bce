//! Load/update/commit for sidecars, serialized per destination path.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{sidecar_path, Sidecar};
use crate::history::unix_now;
use crate::persist;
use crate::storage::part_path;

/// Serializes sidecar writes: all updates for one destination go through a
/// per-path mutex, so read-modify-write cycles never interleave within the
/// process. Cross-process exclusivity is the caller's contract (a single
/// process owns the destination directory).
#[derive(Default)]
pub struct SidecarStore {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SidecarStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, dest: &Path) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap();
        Arc::clone(
            map.entry(dest.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Read the sidecar for `dest`, or `None` if never attempted.
    pub fn load(&self, dest: &Path) -> Result<Option<Sidecar>> {
        let path = sidecar_path(dest);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read sidecar: {}", path.display())),
        };
        let sc: Sidecar = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse sidecar: {}", path.display()))?;
        Ok(Some(sc))
    }

    /// Persist `sidecar` atomically.
    pub fn save(&self, dest: &Path, sidecar: &Sidecar) -> Result<()> {
        let guard = self.lock_for(dest);
        let _held: MutexGuard<'_, ()> = guard.lock().unwrap();
        self.save_locked(dest, sidecar)
    }

    fn save_locked(&self, dest: &Path, sidecar: &Sidecar) -> Result<()> {
        let json = serde_json::to_vec_pretty(sidecar).context("serialize sidecar")?;
        persist::write_atomic(&sidecar_path(dest), &json)
    }

    /// Read-modify-write under the per-path lock. The sidecar must exist.
    pub fn update<F>(&self, dest: &Path, f: F) -> Result<Sidecar>
    where
        F: FnOnce(&mut Sidecar),
    {
        let guard = self.lock_for(dest);
        let _held = guard.lock().unwrap();
        let mut sc = self
            .load(dest)?
            .with_context(|| format!("sidecar missing for {}", dest.display()))?;
        f(&mut sc);
        self.save_locked(dest, &sc)?;
        Ok(sc)
    }

    /// Terminal transition: atomically rename `<dest>.part` to `<dest>`,
    /// then persist the terminal sidecar carrying `sha256`/`downloaded_at`.
    pub fn commit(&self, dest: &Path, sha256: &str, strategy: &str) -> Result<Sidecar> {
        let guard = self.lock_for(dest);
        let _held = guard.lock().unwrap();
        let mut sc = self
            .load(dest)?
            .with_context(|| format!("sidecar missing for {}", dest.display()))?;

        let part = part_path(dest);
        fs::rename(&part, dest)
            .with_context(|| format!("rename {} to {}", part.display(), dest.display()))?;

        sc.sha256 = Some(sha256.to_string());
        sc.downloaded_at = Some(unix_now());
        sc.strategy = Some(strategy.to_string());
        sc.notes.clear();
        self.save_locked(dest, &sc)?;
        Ok(sc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest_in(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("records.csv")
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SidecarStore::new();
        assert!(store.load(&dest_in(&dir)).unwrap().is_none());
    }

    #[test]
    fn save_update_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dest_in(&dir);
        let store = SidecarStore::new();
        let sc = Sidecar::new("https://x/records.csv", "ds");
        store.save(&dest, &sc).unwrap();

        let updated = store
            .update(&dest, |sc| {
                sc.content_length = Some(100);
                sc.retries += 1;
            })
            .unwrap();
        assert_eq!(updated.retries, 1);

        let loaded = store.load(&dest).unwrap().unwrap();
        assert_eq!(loaded.content_length, Some(100));
        assert_eq!(loaded.retries, 1);
    }

    #[test]
    fn commit_renames_part_and_writes_terminal_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dest_in(&dir);
        let store = SidecarStore::new();
        store
            .save(&dest, &Sidecar::new("https://x/records.csv", "ds"))
            .unwrap();
        fs::write(part_path(&dest), b"payload").unwrap();

        let sc = store.commit(&dest, &"a".repeat(64), "s1_dynamic").unwrap();
        assert!(sc.is_terminal());
        assert_eq!(sc.strategy.as_deref(), Some("s1_dynamic"));
        assert!(dest.exists(), "final file in place");
        assert!(!part_path(&dest).exists(), "part renamed away");
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn update_requires_existing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = SidecarStore::new();
        assert!(store.update(&dest_in(&dir), |_| {}).is_err());
    }
}
