//! Review state machine: Ω → Δ → Φ → Ψ.
//!
//! Every transition is checked. An illegal transition returns an error and
//! leaves the machine exactly as it was, so callers that only care about the
//! resulting phase can ignore the error.

use std::fmt;

use chrono::{DateTime, Utc};
use phiseal_model::{Observation, OperatorState, ReviewIntent, ReviewPhase};
use thiserror::Error;

/// Transition names, used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    LockIntent,
    SurfaceUncertainty,
    AttemptResolution,
    Seal,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LockIntent => "lock_intent",
            Self::SurfaceUncertainty => "surface_uncertainty",
            Self::AttemptResolution => "attempt_resolution",
            Self::Seal => "seal",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} from phase {from}")]
    InvalidTransition { from: ReviewPhase, action: Transition },

    #[error("intent is already locked for this review")]
    IntentAlreadyLocked,

    #[error("intent statement is empty")]
    EmptyIntent,

    #[error("intent must be locked before analysis")]
    IntentNotLocked,

    #[error("review is not ready to seal: {}", missing.join(", "))]
    NotReadyToSeal { missing: Vec<&'static str> },
}

/// Inputs to the seal-readiness predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealReadiness {
    pub has_intent: bool,
    pub document_extracted: bool,
    pub has_observations: bool,
    pub spans_satisfied: bool,
}

impl SealReadiness {
    pub fn assess(
        intent: &ReviewIntent,
        document_extracted: bool,
        observations: &[Observation],
        all_spans_present: bool,
    ) -> Self {
        Self {
            has_intent: !intent.is_empty(),
            document_extracted,
            // A review that found nothing cannot be sealed yet; there is no
            // explicit "no issues" marker.
            has_observations: !observations.is_empty(),
            spans_satisfied: all_spans_present,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.has_intent && self.document_extracted && self.has_observations && self.spans_satisfied
    }

    /// Human-readable list of unmet conditions.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.has_intent {
            out.push("intent statement is empty");
        }
        if !self.document_extracted {
            out.push("document text was not extracted");
        }
        if !self.has_observations {
            out.push("no observations recorded");
        }
        if !self.spans_satisfied {
            out.push("observations missing span references");
        }
        out
    }
}

/// Pure readiness predicate; does not touch any machine.
pub fn check_seal_readiness(
    intent: &ReviewIntent,
    document_extracted: bool,
    observations: &[Observation],
    all_spans_present: bool,
) -> bool {
    SealReadiness::assess(intent, document_extracted, observations, all_spans_present).is_ready()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewStateMachine {
    phase: ReviewPhase,
    omega_locked_at: Option<DateTime<Utc>>,
    delta_count: usize,
    phi_actions: usize,
}

impl Default for ReviewStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewStateMachine {
    pub fn new() -> Self {
        Self {
            phase: ReviewPhase::Omega,
            omega_locked_at: None,
            delta_count: 0,
            phi_actions: 0,
        }
    }

    /// Rebuild from a logged snapshot.
    pub fn from_operator_state(state: &OperatorState) -> Self {
        Self {
            phase: state.phase,
            omega_locked_at: state.omega_locked_at,
            delta_count: state.delta_count,
            phi_actions: state.phi_actions,
        }
    }

    pub fn phase(&self) -> ReviewPhase {
        self.phase
    }

    pub fn is_locked(&self) -> bool {
        self.omega_locked_at.is_some()
    }

    pub fn delta_count(&self) -> usize {
        self.delta_count
    }

    pub fn phi_actions(&self) -> usize {
        self.phi_actions
    }

    /// Ω: fix the intent. Allowed once per review.
    pub fn lock_intent(
        &mut self,
        intent: &ReviewIntent,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.is_locked() {
            return Err(TransitionError::IntentAlreadyLocked);
        }
        if self.phase != ReviewPhase::Omega {
            return Err(self.invalid(Transition::LockIntent));
        }
        if intent.is_empty() {
            return Err(TransitionError::EmptyIntent);
        }
        self.omega_locked_at = Some(at);
        Ok(())
    }

    /// Δ: record the size of the latest observation list. Overwrites.
    pub fn surface_uncertainty(&mut self, count: usize) -> Result<(), TransitionError> {
        match self.phase {
            ReviewPhase::Omega | ReviewPhase::Delta => {
                if !self.is_locked() {
                    return Err(TransitionError::IntentNotLocked);
                }
                self.phase = ReviewPhase::Delta;
                self.delta_count = count;
                Ok(())
            }
            _ => Err(self.invalid(Transition::SurfaceUncertainty)),
        }
    }

    /// Φ: one user resolution action. Re-entrant.
    pub fn attempt_resolution(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            ReviewPhase::Delta | ReviewPhase::Phi => {
                self.phase = ReviewPhase::Phi;
                self.phi_actions += 1;
                Ok(())
            }
            _ => Err(self.invalid(Transition::AttemptResolution)),
        }
    }

    /// Ψ: terminal. Readiness is the caller's responsibility; see
    /// [`seal_when_ready`](Self::seal_when_ready).
    pub fn seal(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            ReviewPhase::Delta | ReviewPhase::Phi => {
                self.phase = ReviewPhase::Psi;
                Ok(())
            }
            _ => Err(self.invalid(Transition::Seal)),
        }
    }

    /// Seal only if `readiness` holds. Phase errors take precedence so that
    /// sealing twice reports the phase, not the readiness.
    pub fn seal_when_ready(&mut self, readiness: &SealReadiness) -> Result<(), TransitionError> {
        if !matches!(self.phase, ReviewPhase::Delta | ReviewPhase::Phi) {
            return Err(self.invalid(Transition::Seal));
        }
        if !readiness.is_ready() {
            return Err(TransitionError::NotReadyToSeal {
                missing: readiness.missing(),
            });
        }
        self.seal()
    }

    pub fn state(&self) -> OperatorState {
        OperatorState {
            phase: self.phase,
            omega_locked_at: self.omega_locked_at,
            delta_count: self.delta_count,
            phi_actions: self.phi_actions,
            psi_ready: self.phase == ReviewPhase::Psi,
        }
    }

    fn invalid(&self, action: Transition) -> TransitionError {
        TransitionError::InvalidTransition {
            from: self.phase,
            action,
        }
    }
}
