//! PhiSeal review data model
//!
//! This crate defines the typed records a review produces and the digest
//! encoding used to commit to them:
//!
//! - `span`: citation anchors (`p<paragraph>.s<sentence>`) into document text
//! - `observation`: findings surfaced by the model, tied to spans
//! - `review`: intent, constraints and the Ω→Δ→Φ→Ψ operator state
//! - `artifacts`: `analysis_log.json`, `phi_seal.json`, `manifest.json`
//! - `digest`: SHA-256 digests rendered as `sha256:<hex>`
//!
//! Everything here is plain data. Behaviour (span mapping, parsing, the state
//! machine, sealing) lives in `phiseal-ingest-docs` and `phiseal-review`.

pub mod artifacts;
pub mod digest;
pub mod observation;
pub mod review;
pub mod span;

pub use artifacts::{
    AnalysisLog, ManifestFile, ManifestIndex, SealHashes, SealOperators, SealRecord,
    BUNDLE_VERSION, PHISEAL_VERSION,
};
pub use digest::{sha256_digest, Digest, DigestParseError, SHA256_PREFIX};
pub use observation::{Observation, ObservationStatus, ObservationType};
pub use review::{OperatorState, ReviewConstraints, ReviewIntent, ReviewPhase};
pub use span::Span;

/// Serialize a record to its canonical JSON form.
///
/// Canonical here means compact `serde_json` output in struct declaration
/// order. All maps in this crate are `BTreeMap`s, so two equal values always
/// produce byte-identical JSON; seal digests depend on that.
pub fn canonical_json<T: serde::Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string(value)
}
