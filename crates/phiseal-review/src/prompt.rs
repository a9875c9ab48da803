//! Prompt composition for both analysis API generations.
//!
//! `V2Observations` asks for the observation schema; `V1Legacy` asks for the
//! older delta / assumptions / conflicts layout. Everything else (principles,
//! constraints, intent, span index, document) is shared.

use std::fmt::Write as _;
use std::path::Path;

use phiseal_ingest_docs::SpanMap;
use phiseal_model::{ReviewConstraints, ReviewIntent};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_DOCUMENT_CHARS: usize = 120_000;

const EXCERPT_CHARS: usize = 80;
const TRUNCATION_MARKER: &str = "[... document truncated for length ...]";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are PhiSeal, a structural document reviewer.
Your only task is to surface structural uncertainty in the document you are given:
missing assumptions, ambiguities, gaps, tensions and unresolved references.
You never answer the document's questions, give advice, or issue verdicts.
You work only from the text provided and say so when something is not established.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVariant {
    /// `/v1/analyze`: delta / assumptions / conflicts.
    V1Legacy,
    /// `/analyze`: observations with type, reference, description, spans.
    V2Observations,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub intent: &'a ReviewIntent,
    pub constraints: &'a ReviewConstraints,
    pub document: &'a str,
    pub spans: &'a SpanMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct PromptComposer {
    pub system_prompt: String,
    pub max_document_chars: usize,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
        }
    }
}

impl PromptComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_max_document_chars(mut self, max: usize) -> Self {
        self.max_document_chars = max;
        self
    }

    pub fn compose(&self, variant: PromptVariant, input: &PromptInput<'_>) -> PromptPayload {
        let (document, truncated_at) = truncate_chars(input.document.trim(), self.max_document_chars);
        let lead = input.document.chars().take_while(|c| c.is_whitespace()).count();
        let mut user = String::new();

        match variant {
            PromptVariant::V2Observations => {
                user.push_str("Review the following document according to the PhiSeal principles.\n\n");
            }
            PromptVariant::V1Legacy => {
                user.push_str(
                    "Analyze the following document using the HDT² framework (Ω → Δ → Φ → Ψ).\n\n",
                );
            }
        }

        user.push_str("CORE PRINCIPLES:\n");
        for line in PRINCIPLES {
            let _ = writeln!(user, "- {line}");
        }

        let active = constraint_lines(input.constraints);
        if !active.is_empty() {
            user.push_str("\nCONSTRAINTS:\n");
            for line in active {
                let _ = writeln!(user, "- {line}");
            }
        }

        let _ = write!(user, "\nREVIEW INTENT:\n{}\n", input.intent.statement.trim());
        if let Some(scope) = &input.intent.scope {
            let _ = write!(user, "\nSCOPE:\n{}\n", scope.trim());
        }

        if input.constraints.require_span_refs && !input.spans.is_empty() {
            user.push_str("\nSPAN INDEX (cite these ids):\n");
            for span in input.spans.iter() {
                if truncated_at.is_some_and(|limit| span.char_start >= lead + limit) {
                    break;
                }
                let excerpt = excerpt(input.spans.slice(input.document, span));
                let _ = writeln!(user, "{}: {}", span.span_id, excerpt);
            }
        }

        let _ = write!(user, "\nDOCUMENT CONTENT:\n{document}\n");
        if truncated_at.is_some() {
            let _ = writeln!(user, "{TRUNCATION_MARKER}");
        }

        user.push('\n');
        user.push_str(match variant {
            PromptVariant::V2Observations => V2_SCHEMA,
            PromptVariant::V1Legacy => V1_SCHEMA,
        });

        user.push_str("\nREMEMBER:\n");
        let reminders = match variant {
            PromptVariant::V2Observations => V2_REMINDERS,
            PromptVariant::V1Legacy => V1_REMINDERS,
        };
        for line in reminders {
            let _ = writeln!(user, "- {line}");
        }

        PromptPayload {
            system: self.system_prompt.clone(),
            user,
        }
    }
}

pub fn load_system_prompt(path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(path)
}

const PRINCIPLES: &[&str] = &[
    "You surface structural uncertainty. You do NOT answer, advise, or conclude.",
    "Use neutral language: \"unclear,\" \"unspecified,\" \"not established,\" \"appears to assume.\"",
    "NO scoring, grading, or verdicts (no \"good/bad,\" \"strong/weak\").",
    "Flag unknowns explicitly rather than filling gaps.",
];

const V2_SCHEMA: &str = r#"Please provide observations in the following JSON structure:
{
  "observations": [
    {
      "id": "o1",
      "type": "ambiguity | missing_assumption | gap | unresolved_reference | tension",
      "reference": "Where in the document (e.g., 'Section 2', 'Page 3')",
      "description": "Neutral observation of what is structurally uncertain or unsupported",
      "spans": ["p1.s2"]
    }
  ]
}
"#;

const V1_SCHEMA: &str = r#"Please provide analysis in the following JSON structure:
{
  "delta": [
    {
      "id": "Δ₁",
      "severity": "high|medium|low",
      "description": "specific gap or ambiguity",
      "context": "relevant text from document"
    }
  ],
  "assumptions": [
    {
      "id": "A₁",
      "assumption": "what was assumed",
      "basis": "why it was assumed"
    }
  ],
  "conflicts": [
    {
      "id": "C₁",
      "conflict": "contradictory statements",
      "locations": ["p1.s1"]
    }
  ]
}
"#;

const V2_REMINDERS: &[&str] = &[
    "NO severity scores or confidence levels",
    "NO recommendations or suggestions",
    "NO external facts or gap-filling",
    "ONLY surface what is uncertain, missing, or in tension within the document itself",
];

const V1_REMINDERS: &[&str] = &[
    "NO recommendations or advice",
    "NO gap-filling or hallucination",
    "Surface all unknowns explicitly",
    "Identify contradictions and list all assumptions made",
    "Apply severity tags to all Δ items",
];

fn constraint_lines(c: &ReviewConstraints) -> Vec<&'static str> {
    let mut out = Vec::new();
    if c.stay_in_document {
        out.push("Stay within the document. Do not bring in outside facts.");
    }
    if c.no_verdict_language {
        out.push("Do not use verdict language (score, correct, valid, strong, weak, proven and similar).");
    }
    if c.require_span_refs {
        out.push("Every observation must cite at least one span id from the span index.");
    }
    out
}

/// Cut `text` to at most `max` chars. Returns the char index of the cut, if any.
fn truncate_chars(text: &str, max: usize) -> (&str, Option<usize>) {
    match text.char_indices().nth(max) {
        Some((byte, _)) => (&text[..byte], Some(max)),
        None => (text, None),
    }
}

fn excerpt(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}
