//! Intent, constraints and operator state of a review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the reviewer wants surfaced. Immutable once locked (Ω).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIntent {
    pub statement: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl ReviewIntent {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        self.scope = if scope.trim().is_empty() { None } else { Some(scope) };
        self
    }

    pub fn is_empty(&self) -> bool {
        self.statement.trim().is_empty()
    }
}

/// Behavioural constraints fixed at review start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewConstraints {
    #[serde(default = "default_true")]
    pub stay_in_document: bool,
    #[serde(default = "default_true")]
    pub no_verdict_language: bool,
    #[serde(default = "default_true")]
    pub require_span_refs: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ReviewConstraints {
    fn default() -> Self {
        Self {
            stay_in_document: true,
            no_verdict_language: true,
            require_span_refs: true,
        }
    }
}

/// Ω → Δ → Φ → Ψ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewPhase {
    /// Intent locked.
    #[serde(rename = "Ω")]
    Omega,
    /// Uncertainty surfaced.
    #[serde(rename = "Δ")]
    Delta,
    /// Resolution attempts (re-entrant).
    #[serde(rename = "Φ")]
    Phi,
    /// Sealed (terminal).
    #[serde(rename = "Ψ")]
    Psi,
}

impl ReviewPhase {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Omega => "Ω",
            Self::Delta => "Δ",
            Self::Phi => "Φ",
            Self::Psi => "Ψ",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Psi
    }
}

impl fmt::Display for ReviewPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Snapshot of the state machine, as logged in artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorState {
    pub phase: ReviewPhase,
    pub omega_locked_at: Option<DateTime<Utc>>,
    pub delta_count: usize,
    pub phi_actions: usize,
    pub psi_ready: bool,
}
