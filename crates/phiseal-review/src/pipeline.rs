//! End-to-end review pipeline.
//!
//! ```text
//! extracted text -> span map -> Ω lock -> prompt -> model -> parse -> Δ -> analysis log
//! analysis log + document -> readiness -> Ψ -> seal bundle
//! ```

use chrono::{DateTime, Utc};
use phiseal_ingest_docs::{map_spans, ExtractedText, SpanMap};
use phiseal_model::{
    AnalysisLog, Digest, Observation, ObservationStatus, ReviewConstraints, ReviewIntent,
    ReviewPhase,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifacts::{
    check_verdict_language, create_analysis_log, generate_review_id, validate_observation_spans,
    ArtifactError, SealBundle,
};
use crate::llm::{ModelClient, ModelError};
use crate::parse::{ParseStrategy, ResponseParser};
use crate::prompt::{PromptComposer, PromptInput, PromptVariant};
use crate::state::{ReviewStateMachine, SealReadiness, TransitionError};

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("{0}")]
    Validation(String),

    #[error("review {0} is already sealed")]
    AlreadySealed(String),

    #[error("observation not found: {0}")]
    UnknownObservation(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

pub type Result<T> = std::result::Result<T, ReviewError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub intent: ReviewIntent,
    pub constraints: ReviewConstraints,
    pub variant: PromptVariant,
}

impl ReviewRequest {
    pub fn new(intent: ReviewIntent) -> Self {
        Self {
            intent,
            constraints: ReviewConstraints::default(),
            variant: PromptVariant::V2Observations,
        }
    }

    pub fn with_constraints(mut self, constraints: ReviewConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_variant(mut self, variant: PromptVariant) -> Self {
        self.variant = variant;
        self
    }
}

/// Result of one analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub review_id: String,
    pub analysis_log: AnalysisLog,
    pub spans: SpanMap,
    pub parse_strategy: ParseStrategy,
    /// Digest of the extracted document text.
    pub document_digest: Digest,
    pub extraction_method: String,
    /// Advisory verdict-language hits, one line per observation.
    pub verdict_warnings: Vec<String>,
    /// Missing or unknown span references.
    pub span_warnings: Vec<String>,
}

impl AnalysisOutcome {
    pub fn observations(&self) -> &[Observation] {
        &self.analysis_log.observations
    }
}

pub struct Reviewer<M: ModelClient> {
    model: M,
    composer: PromptComposer,
    parser: ResponseParser,
}

impl<M: ModelClient> Reviewer<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            composer: PromptComposer::default(),
            parser: ResponseParser::new(),
        }
    }

    pub fn with_composer(mut self, composer: PromptComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub async fn analyze(
        &self,
        document: &ExtractedText,
        request: &ReviewRequest,
    ) -> Result<AnalysisOutcome> {
        self.analyze_at(document, request, Utc::now()).await
    }

    pub async fn analyze_at(
        &self,
        document: &ExtractedText,
        request: &ReviewRequest,
        now: DateTime<Utc>,
    ) -> Result<AnalysisOutcome> {
        if document.text.trim().is_empty() {
            return Err(ReviewError::Validation("document has no text".to_string()));
        }

        let review_id = generate_review_id(now);
        let spans = map_spans(&document.text, &document.page_boundaries);

        let mut machine = ReviewStateMachine::new();
        machine.lock_intent(&request.intent, now)?;

        let payload = self.composer.compose(
            request.variant,
            &PromptInput {
                intent: &request.intent,
                constraints: &request.constraints,
                document: &document.text,
                spans: &spans,
            },
        );

        info!(
            %review_id,
            model = self.model.name(),
            spans = spans.len(),
            "requesting analysis"
        );
        let reply = self.model.complete(&payload.system, &payload.user).await?;

        let parsed = self.parser.parse_at(&reply, now);
        machine.surface_uncertainty(parsed.observations.len())?;
        debug!(
            %review_id,
            strategy = %parsed.strategy,
            observations = parsed.observations.len(),
            "analysis parsed"
        );

        let analysis_log = create_analysis_log(
            &review_id,
            &request.intent,
            &request.constraints,
            &machine.state(),
            &parsed.observations,
            now,
        );

        let verdict_warnings = if request.constraints.no_verdict_language {
            verdict_warnings(&parsed.observations)
        } else {
            Vec::new()
        };
        let span_warnings = span_warnings(&spans, &parsed.observations, &request.constraints);

        Ok(AnalysisOutcome {
            review_id,
            analysis_log,
            spans,
            parse_strategy: parsed.strategy,
            document_digest: Digest::of_text(&document.text),
            extraction_method: document.method.clone(),
            verdict_warnings,
            span_warnings,
        })
    }

    pub fn seal(
        &self,
        log: &AnalysisLog,
        document_text: &str,
        spans: Option<&SpanMap>,
        seal_note: Option<String>,
    ) -> Result<SealBundle> {
        seal_review_at(log, document_text, spans, seal_note, Utc::now())
    }
}

/// Φ: re-status one observation and count the resolution action.
pub fn apply_resolution(
    log: &mut AnalysisLog,
    observation_id: &str,
    status: ObservationStatus,
) -> Result<()> {
    let mut machine = ReviewStateMachine::from_operator_state(&log.operators);
    if machine.phase() == ReviewPhase::Psi {
        return Err(ReviewError::AlreadySealed(log.review_id.clone()));
    }
    let idx = log
        .observations
        .iter()
        .position(|o| o.id == observation_id)
        .ok_or_else(|| ReviewError::UnknownObservation(observation_id.to_string()))?;

    machine.attempt_resolution()?;
    log.observations[idx].status = status;
    log.operators = machine.state();
    Ok(())
}

/// Ψ: check readiness, move the log to Ψ and build the bundle.
///
/// `spans` should be the span map returned by analysis; when absent it is
/// recomputed from `document_text` without page information.
pub fn seal_review_at(
    log: &AnalysisLog,
    document_text: &str,
    spans: Option<&SpanMap>,
    seal_note: Option<String>,
    now: DateTime<Utc>,
) -> Result<SealBundle> {
    let mut machine = ReviewStateMachine::from_operator_state(&log.operators);
    if machine.phase() == ReviewPhase::Psi {
        return Err(ReviewError::AlreadySealed(log.review_id.clone()));
    }

    let span_check =
        validate_observation_spans(&log.observations, log.constraints.require_span_refs);
    let readiness = SealReadiness::assess(
        &log.intent,
        !document_text.trim().is_empty(),
        &log.observations,
        span_check.valid,
    );
    machine.seal_when_ready(&readiness)?;

    let computed;
    let spans = match spans {
        Some(s) => s,
        None => {
            computed = map_spans(document_text, &[]);
            &computed
        }
    };
    let span_json = spans.to_canonical_json().map_err(ArtifactError::from)?;

    let mut sealed_log = log.clone();
    sealed_log.operators = machine.state();

    let bundle = SealBundle::build(&sealed_log, document_text, &span_json, now, seal_note)?;
    info!(review_id = %log.review_id, "review sealed");
    Ok(bundle)
}

fn verdict_warnings(observations: &[Observation]) -> Vec<String> {
    observations
        .iter()
        .enumerate()
        .filter_map(|(i, o)| {
            let check = check_verdict_language(&o.description);
            check.has_violation.then(|| {
                format!(
                    "Observation {} ({}) uses verdict language: {}",
                    i + 1,
                    o.id,
                    check.violations.join(", ")
                )
            })
        })
        .collect()
}

fn span_warnings(
    spans: &SpanMap,
    observations: &[Observation],
    constraints: &ReviewConstraints,
) -> Vec<String> {
    let mut out = validate_observation_spans(observations, constraints.require_span_refs).errors;
    for (obs_id, span_id) in spans.unknown_references(observations) {
        out.push(format!("Observation {obs_id} cites unknown span {span_id}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModelClient;
    use chrono::TimeZone;

    const DOC: &str = "Sales will grow. We assume demand stays constant.";
    const REPLY: &str = r#"{"observations":[{"id":"o1","type":"missing_assumption","description":"Demand constancy is assumed without support","spans":["p1.s2"]}]}"#;

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn doc(text: &str) -> ExtractedText {
        ExtractedText {
            text: text.to_string(),
            page_boundaries: Vec::new(),
            method: "test".to_string(),
        }
    }

    fn request() -> ReviewRequest {
        ReviewRequest::new(ReviewIntent::new("Check assumptions"))
    }

    #[tokio::test]
    async fn analysis_produces_delta_log() {
        let reviewer = Reviewer::new(MockModelClient::always(REPLY));
        let out = reviewer.analyze_at(&doc(DOC), &request(), t()).await.unwrap();

        assert_eq!(out.parse_strategy, ParseStrategy::JsonRaw);
        assert_eq!(out.observations().len(), 1);
        assert_eq!(out.observations()[0].status, ObservationStatus::Open);
        assert_eq!(out.analysis_log.operators.phase, ReviewPhase::Delta);
        assert_eq!(out.analysis_log.operators.delta_count, 1);
        assert_eq!(out.analysis_log.operators.omega_locked_at, Some(t()));
        assert_eq!(out.spans.len(), 2);
        assert!(out.span_warnings.is_empty());
        assert!(out.verdict_warnings.is_empty());
        assert_eq!(out.document_digest, Digest::of_text(DOC));

        let (_, user) = reviewer.model().last_prompt().unwrap();
        assert!(user.contains("p1.s2: We assume demand stays constant."));
    }

    #[tokio::test]
    async fn warnings_flag_verdicts_and_bad_spans() {
        let reply = r#"{"observations":[{"id":"o1","description":"The claim is weak","spans":["p7.s1"]},{"id":"o2","description":"Unclear owner"}]}"#;
        let reviewer = Reviewer::new(MockModelClient::always(reply));
        let out = reviewer.analyze_at(&doc(DOC), &request(), t()).await.unwrap();

        assert_eq!(
            out.verdict_warnings,
            vec!["Observation 1 (o1) uses verdict language: weak"]
        );
        assert_eq!(
            out.span_warnings,
            vec![
                "Observation 2 (o2) missing span references",
                "Observation o1 cites unknown span p7.s1",
            ]
        );
    }

    #[tokio::test]
    async fn empty_intent_is_rejected_before_model_call() {
        let reviewer = Reviewer::new(MockModelClient::always(REPLY));
        let req = ReviewRequest::new(ReviewIntent::new(" "));
        let err = reviewer.analyze_at(&doc(DOC), &req, t()).await.unwrap_err();
        assert!(matches!(err, ReviewError::Transition(TransitionError::EmptyIntent)));
        assert_eq!(reviewer.model().calls(), 0);
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let reviewer = Reviewer::new(MockModelClient::failing(ModelError::Http {
            status: 401,
            body: "bad key".into(),
        }));
        let err = reviewer.analyze_at(&doc(DOC), &request(), t()).await.unwrap_err();
        assert!(matches!(err, ReviewError::Model(ModelError::Http { status: 401, .. })));
    }

    #[tokio::test]
    async fn resolve_then_seal_then_refuse_second_seal() {
        let reviewer = Reviewer::new(MockModelClient::always(REPLY));
        let out = reviewer.analyze_at(&doc(DOC), &request(), t()).await.unwrap();

        let mut log = out.analysis_log.clone();
        apply_resolution(&mut log, "o1", ObservationStatus::Acknowledged).unwrap();
        assert_eq!(log.operators.phase, ReviewPhase::Phi);
        assert_eq!(log.operators.phi_actions, 1);
        assert!(matches!(
            apply_resolution(&mut log, "nope", ObservationStatus::Resolved),
            Err(ReviewError::UnknownObservation(_))
        ));

        let bundle = seal_review_at(&log, DOC, Some(&out.spans), Some("ok".into()), t()).unwrap();
        assert_eq!(bundle.seal.operators.phi_actions, 1);
        assert_eq!(bundle.seal.operators.delta_open, 0);
        assert_eq!(bundle.seal.seal_note.as_deref(), Some("ok"));
        assert!(bundle.verify().valid);

        let sealed_log: AnalysisLog =
            serde_json::from_str(&bundle.files[crate::artifacts::ANALYSIS_LOG_FILE]).unwrap();
        assert_eq!(sealed_log.operators.phase, ReviewPhase::Psi);
        assert!(matches!(
            seal_review_at(&sealed_log, DOC, None, None, t()),
            Err(ReviewError::AlreadySealed(_))
        ));
    }

    #[tokio::test]
    async fn seal_requires_observations_and_spans() {
        let reviewer = Reviewer::new(MockModelClient::always(r#"{"observations":[]}"#));
        let out = reviewer.analyze_at(&doc(DOC), &request(), t()).await.unwrap();
        assert!(matches!(
            seal_review_at(&out.analysis_log, DOC, None, None, t()),
            Err(ReviewError::Transition(TransitionError::NotReadyToSeal { .. }))
        ));

        let reviewer = Reviewer::new(MockModelClient::always("Just prose."));
        let out = reviewer.analyze_at(&doc(DOC), &request(), t()).await.unwrap();
        // Fallback observation has no spans and spans are required.
        assert!(seal_review_at(&out.analysis_log, DOC, None, None, t()).is_err());
    }

    #[tokio::test]
    async fn seal_is_reproducible() {
        let reviewer = Reviewer::new(MockModelClient::always(REPLY));
        let out = reviewer.analyze_at(&doc(DOC), &request(), t()).await.unwrap();
        let a = seal_review_at(&out.analysis_log, DOC, None, None, t()).unwrap();
        let b = seal_review_at(&out.analysis_log, DOC, Some(&out.spans), None, t()).unwrap();
        assert_eq!(a.seal.hashes, b.seal.hashes);
    }
}
