//! Artifact generation: analysis log, seal record, manifest index, bundle.
//!
//! Digest inputs are the exact strings written to disk. Callers serialize
//! with [`phiseal_model::canonical_json`] so that equal records always hash
//! the same.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use phiseal_model::{
    canonical_json, AnalysisLog, Digest, ManifestFile, ManifestIndex, Observation,
    ObservationStatus, OperatorState, ReviewConstraints, ReviewIntent, ReviewPhase, SealHashes,
    SealOperators, SealRecord, BUNDLE_VERSION, PHISEAL_VERSION,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DOCUMENT_FILE: &str = "document.txt";
pub const SPAN_MAP_FILE: &str = "span_map.json";
pub const ANALYSIS_LOG_FILE: &str = "analysis_log.json";
pub const SEAL_FILE: &str = "phi_seal.json";
pub const MANIFEST_FILE: &str = "manifest.json";

const VERDICT_WORDS: &[&str] = &[
    "score",
    "correct",
    "incorrect",
    "wrong",
    "right",
    "proven",
    "disproven",
    "good",
    "bad",
    "strong",
    "weak",
    "excellent",
    "poor",
    "high quality",
    "low quality",
    "valid",
    "invalid",
    "true",
    "false",
];

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// `review_<unix_millis>_<9 char suffix>`.
pub fn generate_review_id(now: DateTime<Utc>) -> String {
    format!("review_{}_{}", now.timestamp_millis(), random_suffix())
}

/// Nine lowercase hex chars from a v4 uuid.
pub fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..9].to_string()
}

pub fn create_analysis_log(
    review_id: &str,
    intent: &ReviewIntent,
    constraints: &ReviewConstraints,
    operators: &OperatorState,
    observations: &[Observation],
    created_at: DateTime<Utc>,
) -> AnalysisLog {
    AnalysisLog {
        phiseal_version: PHISEAL_VERSION.to_string(),
        review_id: review_id.to_string(),
        created_at,
        intent: intent.clone(),
        constraints: *constraints,
        operators: operators.clone(),
        observations: observations.to_vec(),
    }
}

/// Everything a seal commits to.
#[derive(Debug, Clone)]
pub struct SealInputs<'a> {
    pub review_id: &'a str,
    pub document_text: &'a str,
    pub span_map_json: &'a str,
    pub analysis_log_json: &'a str,
    pub phi_actions: usize,
    pub delta_open: usize,
    pub sealed_at: DateTime<Utc>,
    pub seal_note: Option<String>,
}

/// Observations still `open`; recorded as `delta_open` in the seal.
pub fn count_open(observations: &[Observation]) -> usize {
    observations
        .iter()
        .filter(|o| o.status == ObservationStatus::Open)
        .count()
}

pub fn create_seal_record(inputs: &SealInputs<'_>) -> SealRecord {
    let (document_txt, (span_map, analysis_log)) = rayon::join(
        || Digest::of_text(inputs.document_text),
        || {
            rayon::join(
                || Digest::of_text(inputs.span_map_json),
                || Digest::of_text(inputs.analysis_log_json),
            )
        },
    );

    SealRecord {
        phiseal_version: PHISEAL_VERSION.to_string(),
        review_id: inputs.review_id.to_string(),
        sealed_at: inputs.sealed_at,
        operators: SealOperators {
            phase: ReviewPhase::Psi,
            delta_open: inputs.delta_open,
            phi_actions: inputs.phi_actions,
            psi_ready: true,
        },
        hashes: SealHashes {
            document_txt,
            span_map,
            analysis_log,
        },
        seal_note: inputs
            .seal_note
            .clone()
            .filter(|note| !note.trim().is_empty()),
    }
}

pub fn create_manifest_index(
    review_id: &str,
    files: &[(&str, &str)],
    sealed_at: DateTime<Utc>,
) -> ManifestIndex {
    ManifestIndex {
        review_id: review_id.to_string(),
        bundle_version: BUNDLE_VERSION.to_string(),
        sealed_at,
        files: files
            .iter()
            .map(|(name, content)| ManifestFile {
                name: name.to_string(),
                sha256: Digest::of_text(content),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

pub fn validate_observation_spans(observations: &[Observation], required: bool) -> SpanValidation {
    if !required {
        return SpanValidation {
            valid: true,
            errors: Vec::new(),
        };
    }
    let errors: Vec<String> = observations
        .iter()
        .enumerate()
        .filter(|(_, o)| !o.has_spans())
        .map(|(i, o)| format!("Observation {} ({}) missing span references", i + 1, o.id))
        .collect();
    SpanValidation {
        valid: errors.is_empty(),
        errors,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCheck {
    pub has_violation: bool,
    pub violations: Vec<String>,
}

/// Case-insensitive substring scan for evaluative words. Advisory only:
/// "right" also matches "copyright".
pub fn check_verdict_language(text: &str) -> VerdictCheck {
    let lower = text.to_lowercase();
    let violations: Vec<String> = VERDICT_WORDS
        .iter()
        .filter(|w| lower.contains(*w))
        .map(|w| w.to_string())
        .collect();
    VerdictCheck {
        has_violation: !violations.is_empty(),
        violations,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealVerification {
    pub valid: bool,
    /// Names of the committed inputs whose digest no longer matches.
    pub mismatches: Vec<String>,
}

pub fn verify_seal(
    seal: &SealRecord,
    document_text: &str,
    span_map_json: &str,
    analysis_log_json: &str,
) -> SealVerification {
    let checks = [
        ("document_txt", &seal.hashes.document_txt, document_text),
        ("span_map", &seal.hashes.span_map, span_map_json),
        ("analysis_log", &seal.hashes.analysis_log, analysis_log_json),
    ];
    let mut mismatches = Vec::new();
    for (name, expected, content) in checks {
        if Digest::of_text(content) != *expected {
            mismatches.push(name.to_string());
        }
    }
    SealVerification {
        valid: mismatches.is_empty(),
        mismatches,
    }
}

/// Check every manifest entry against `files`. Missing files count as
/// mismatches.
pub fn verify_manifest(manifest: &ManifestIndex, files: &BTreeMap<String, String>) -> Vec<String> {
    manifest
        .files
        .iter()
        .filter(|entry| {
            files
                .get(&entry.name)
                .map(|content| Digest::of_text(content) != entry.sha256)
                .unwrap_or(true)
        })
        .map(|entry| entry.name.clone())
        .collect()
}

/// A sealed review as exported files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealBundle {
    pub seal: SealRecord,
    pub manifest: ManifestIndex,
    /// File name → exact content, including `manifest.json`.
    pub files: BTreeMap<String, String>,
}

impl SealBundle {
    /// Seal `log` and index the four committed files.
    pub fn build(
        log: &AnalysisLog,
        document_text: &str,
        span_map_json: &str,
        sealed_at: DateTime<Utc>,
        seal_note: Option<String>,
    ) -> Result<Self, ArtifactError> {
        let log_json = canonical_json(log)?;
        let seal = create_seal_record(&SealInputs {
            review_id: &log.review_id,
            document_text,
            span_map_json,
            analysis_log_json: &log_json,
            phi_actions: log.operators.phi_actions,
            delta_open: count_open(&log.observations),
            sealed_at,
            seal_note,
        });
        let seal_json = canonical_json(&seal)?;

        let manifest = create_manifest_index(
            &log.review_id,
            &[
                (DOCUMENT_FILE, document_text),
                (SPAN_MAP_FILE, span_map_json),
                (ANALYSIS_LOG_FILE, log_json.as_str()),
                (SEAL_FILE, seal_json.as_str()),
            ],
            sealed_at,
        );
        let manifest_json = canonical_json(&manifest)?;

        let mut files = BTreeMap::new();
        files.insert(DOCUMENT_FILE.to_string(), document_text.to_string());
        files.insert(SPAN_MAP_FILE.to_string(), span_map_json.to_string());
        files.insert(ANALYSIS_LOG_FILE.to_string(), log_json);
        files.insert(SEAL_FILE.to_string(), seal_json);
        files.insert(MANIFEST_FILE.to_string(), manifest_json);

        Ok(Self {
            seal,
            manifest,
            files,
        })
    }

    /// Re-check the seal digests, then the manifest entries, against the
    /// bundled files.
    pub fn verify(&self) -> SealVerification {
        let get = |name: &str| self.files.get(name).map(String::as_str).unwrap_or("");
        let mut result = verify_seal(
            &self.seal,
            get(DOCUMENT_FILE),
            get(SPAN_MAP_FILE),
            get(ANALYSIS_LOG_FILE),
        );
        result
            .mismatches
            .extend(verify_manifest(&self.manifest, &self.files));
        result.valid = result.mismatches.is_empty();
        result
    }
}
