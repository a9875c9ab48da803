//! Directory-backed manifest store
//!
//! Layout: `<dir>/<id>.json`, one pretty-printed [`StoredManifest`] per file.
//! Writers hold a store-wide mutex and write `<id>.json.tmp` before renaming
//! it into place, so readers never observe a half-written record.

use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{is_valid_id, sort_newest_first, ManifestStore, Result, StoreError, StoredManifest};

const RECORD_EXT: &str = "json";

pub struct FileManifestStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileManifestStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "opened manifest store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXT}"))
    }

    fn read_record(path: &Path) -> Result<Option<StoredManifest>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ManifestStore for FileManifestStore {
    fn insert(&self, record: StoredManifest) -> Result<()> {
        if !is_valid_id(&record.id) {
            return Err(StoreError::InvalidId(record.id));
        }
        let bytes = serde_json::to_vec_pretty(&record)?;
        let path = self.record_path(&record.id);
        let tmp = path.with_extension(format!("{RECORD_EXT}.tmp"));

        let _guard = self.write_lock.lock();
        fs::write(&tmp, &bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<StoredManifest>> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        Self::read_record(&self.record_path(id))
    }

    fn delete(&self, id: &str) -> Result<bool> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<StoredManifest>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            // Unreadable files are skipped so one bad record does not hide the rest.
            match Self::read_record(&path) {
                Ok(Some(record)) => out.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping manifest record"),
            }
        }
        sort_newest_first(&mut out);
        out.truncate(limit);
        Ok(out)
    }
}
