//! PhiSeal manifest store
//!
//! A small key/value capability for sealed-review manifests:
//!
//! ```text
//! put(manifest) ──► id = manifest_<millis>_<suffix>
//! get(id)       ──► Option<StoredManifest>
//! delete(id)    ──► bool
//! list(limit)   ──► newest first
//! ```
//!
//! Two backends:
//! - [`MemoryManifestStore`]: process-local map, lost on restart
//! - [`FileManifestStore`]: one JSON file per manifest in a directory
//!
//! The HTTP layer holds an `Arc<dyn ManifestStore>`; there is no global map.

pub mod file;


use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub use file::FileManifestStore;

/// Upper bound for `GET /manifests` listings.
pub const DEFAULT_LIST_LIMIT: usize = 50;

// ============================================================================
// Core Types
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid manifest id: {0:?}")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A manifest as submitted by the client, plus the store's own metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredManifest {
    pub id: String,
    pub stored_at: DateTime<Utc>,
    pub manifest: Value,
}

impl StoredManifest {
    pub fn new(manifest: Value, stored_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_manifest_id(stored_at),
            stored_at,
            manifest,
        }
    }
}

/// `manifest_<unix millis>_<9 hex chars>`
pub fn generate_manifest_id(now: DateTime<Utc>) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("manifest_{}_{}", now.timestamp_millis(), suffix)
}

/// Ids double as file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Sort newest first; equal timestamps fall back to descending id.
pub(crate) fn sort_newest_first(records: &mut [StoredManifest]) {
    records.sort_by(|a, b| {
        b.stored_at
            .cmp(&a.stored_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

// ============================================================================
// Store trait
// ============================================================================

pub trait ManifestStore: Send + Sync {
    /// Insert or replace a record under its own id.
    fn insert(&self, record: StoredManifest) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<StoredManifest>>;

    /// `true` when something was removed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// At most `limit` records, newest first.
    fn list(&self, limit: usize) -> Result<Vec<StoredManifest>>;

    /// Store a new manifest under a fresh id.
    fn put(&self, manifest: Value) -> Result<StoredManifest> {
        let record = StoredManifest::new(manifest, Utc::now());
        self.insert(record.clone())?;
        Ok(record)
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    records: RwLock<HashMap<String, StoredManifest>>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl ManifestStore for MemoryManifestStore {
    fn insert(&self, record: StoredManifest) -> Result<()> {
        if !is_valid_id(&record.id) {
            return Err(StoreError::InvalidId(record.id));
        }
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<StoredManifest>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().remove(id).is_some())
    }

    fn list(&self, limit: usize) -> Result<Vec<StoredManifest>> {
        let mut all: Vec<StoredManifest> = self.records.read().values().cloned().collect();
        sort_newest_first(&mut all);
        all.truncate(limit);
        Ok(all)
    }
}
