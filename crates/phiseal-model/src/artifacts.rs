//! Exported audit records: `analysis_log.json`, `phi_seal.json`, `manifest.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::observation::Observation;
use crate::review::{OperatorState, ReviewConstraints, ReviewIntent, ReviewPhase};

/// Version stamp written into logs and seals.
pub const PHISEAL_VERSION: &str = "1.0";

/// Version stamp written into manifest indexes.
pub const BUNDLE_VERSION: &str = "1.0";

/// Per-review working record, produced after the first analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisLog {
    pub phiseal_version: String,
    pub review_id: String,
    pub created_at: DateTime<Utc>,
    pub intent: ReviewIntent,
    pub constraints: ReviewConstraints,
    pub operators: OperatorState,
    pub observations: Vec<Observation>,
}

/// Operator snapshot frozen into a seal. `phase` is always Ψ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealOperators {
    pub phase: ReviewPhase,
    pub delta_open: usize,
    pub phi_actions: usize,
    pub psi_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealHashes {
    pub document_txt: Digest,
    pub span_map: Digest,
    pub analysis_log: Digest,
}

/// Commitment to one document + span map + analysis log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealRecord {
    pub phiseal_version: String,
    pub review_id: String,
    pub sealed_at: DateTime<Utc>,
    pub operators: SealOperators,
    pub hashes: SealHashes,
    #[serde(default)]
    pub seal_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub sha256: Digest,
}

/// Index of every exported file in a sealed bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIndex {
    pub review_id: String,
    pub bundle_version: String,
    pub sealed_at: DateTime<Utc>,
    pub files: Vec<ManifestFile>,
}

impl ManifestIndex {
    pub fn file(&self, name: &str) -> Option<&ManifestFile> {
        self.files.iter().find(|f| f.name == name)
    }
}
