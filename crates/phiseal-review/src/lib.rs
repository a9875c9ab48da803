//! PhiSeal review engine
//!
//! One review moves through four operators:
//!
//! | Phase | Operator | Meaning                                   |
//! |-------|----------|-------------------------------------------|
//! | Ω     | lock     | review intent is fixed                     |
//! | Δ     | surface  | observations are recorded                  |
//! | Φ     | resolve  | observations are re-statused by a human    |
//! | Ψ     | seal     | artifacts are hashed and frozen            |
//!
//! Modules:
//! - `state`: the Ω→Δ→Φ→Ψ machine and seal readiness
//! - `prompt`: system/user prompt composition
//! - `llm`: model client trait, HTTP providers and the mock
//! - `parse`: model reply → observations (JSON, legacy patterns, fallback)
//! - `artifacts`: analysis log, seal record, manifest, verification
//! - `pipeline`: the analyze and seal flows wired together
//!
//! Nothing here decides whether a document is right. Observations describe
//! uncertainty; the seal only proves which text and log were reviewed.

pub mod artifacts;
pub mod llm;
pub mod parse;
pub mod pipeline;
pub mod prompt;
pub mod state;

pub use artifacts::{
    check_verdict_language, validate_observation_spans, verify_manifest, verify_seal,
    ArtifactError, SealBundle, SealVerification,
};
pub use llm::{create_client, LlmConfig, MockModelClient, ModelClient, ModelError, Provider};
pub use parse::{parse_response, ParseOutcome, ParseStrategy, ResponseParser};
pub use pipeline::{
    apply_resolution, seal_review_at, AnalysisOutcome, ReviewError, ReviewRequest, Reviewer,
};
pub use prompt::{PromptComposer, PromptVariant};
pub use state::{ReviewStateMachine, SealReadiness, Transition, TransitionError};
