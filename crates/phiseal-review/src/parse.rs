//! Best-effort recovery of observations from model replies.
//!
//! Strategies run in order and the first one that yields a usable result
//! wins:
//!
//! 1. `JsonFenced`: a fenced code block holding a JSON object
//! 2. `JsonRaw`: the first balanced, usable `{...}` in the reply
//! 3. `LegacyPattern`: `Δn` / `An` / `Cn` markers with labeled fields
//! 4. `Fallback`: the whole reply as a single observation
//!
//! A JSON object is usable when it has an `observations` array, or any of the
//! older `delta` / `assumptions` / `conflicts` arrays. Parsing never fails.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use phiseal_model::{Observation, ObservationStatus, ObservationType, Span};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

const NO_DESCRIPTION: &str = "No description";
const FALLBACK_NO_JSON: &str = "general_observation";
const FALLBACK_BAD_JSON: &str = "analysis";
const FALLBACK_REFERENCE: &str = "Document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    JsonFenced,
    JsonRaw,
    LegacyPattern,
    Fallback,
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::JsonFenced => "json_fenced",
            Self::JsonRaw => "json_raw",
            Self::LegacyPattern => "legacy_pattern",
            Self::Fallback => "fallback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub strategy: ParseStrategy,
    pub observations: Vec<Observation>,
}

/// Parse with the current time used for generated ids.
pub fn parse_response(reply: &str) -> ParseOutcome {
    ResponseParser::new().parse(reply)
}

struct LegacyPatterns {
    delta: Regex,
    assumption: Regex,
    conflict: Regex,
}

fn legacy_patterns() -> &'static LegacyPatterns {
    static PATTERNS: OnceLock<LegacyPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| LegacyPatterns {
        delta: Regex::new(
            r#"(?s)Δ[0-9₀-₉]+.*?(?i:severity)"?\s*:\s*"?(?i:(high|medium|low))"?.*?(?i:description)"?\s*:\s*"([^"]+)".*?(?i:context)"?\s*:\s*"([^"]+)""#,
        )
        .expect("delta pattern is valid"),
        assumption: Regex::new(
            r#"(?s)\bA[0-9₀-₉]+.*?(?i:assumption)"?\s*:\s*"([^"]+)".*?(?i:basis)"?\s*:\s*"([^"]+)""#,
        )
        .expect("assumption pattern is valid"),
        conflict: Regex::new(
            r#"(?s)\bC[0-9₀-₉]+.*?(?i:conflict)"?\s*:\s*"([^"]+)".*?(?i:locations)"?\s*:\s*\[(.*?)\]"#,
        )
        .expect("conflict pattern is valid"),
    })
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("fence pattern is valid")
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, reply: &str) -> ParseOutcome {
        self.parse_at(reply, Utc::now())
    }

    /// Parse with an explicit clock, so generated ids are reproducible.
    pub fn parse_at(&self, reply: &str, now: DateTime<Utc>) -> ParseOutcome {
        let (strategy, drafts) = self.run_strategies(reply);
        debug!(%strategy, count = drafts.len(), "parsed model reply");
        ParseOutcome {
            strategy,
            observations: normalize(drafts, now.timestamp_millis()),
        }
    }

    fn run_strategies(&self, reply: &str) -> (ParseStrategy, Vec<Draft>) {
        let mut saw_json = false;

        for caps in fence_pattern().captures_iter(reply) {
            let body = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            match first_usable_object(body) {
                Candidate::Usable(drafts) => return (ParseStrategy::JsonFenced, drafts),
                Candidate::Unusable => saw_json = true,
                Candidate::Missing => {}
            }
        }

        match first_usable_object(reply) {
            Candidate::Usable(drafts) => return (ParseStrategy::JsonRaw, drafts),
            Candidate::Unusable => saw_json = true,
            Candidate::Missing => {}
        }

        let legacy = legacy_scan(reply);
        if !legacy.is_empty() {
            return (ParseStrategy::LegacyPattern, legacy);
        }

        let tag = if saw_json {
            FALLBACK_BAD_JSON
        } else {
            FALLBACK_NO_JSON
        };
        let draft = Draft {
            kind: Some(tag.to_string()),
            description: Some(reply.trim().to_string()),
            reference: Some(FALLBACK_REFERENCE.to_string()),
            ..Draft::default()
        };
        (ParseStrategy::Fallback, vec![draft])
    }
}

/// Observation fields as recovered, before defaults are applied.
#[derive(Debug, Default, Clone)]
struct Draft {
    id: Option<String>,
    kind: Option<String>,
    description: Option<String>,
    spans: Vec<String>,
    status: Option<String>,
    reference: Option<String>,
    context: Option<String>,
    basis: Option<String>,
    severity: Option<String>,
}

enum Candidate {
    Usable(Vec<Draft>),
    /// Something brace-shaped was found but it was not a usable object.
    Unusable,
    Missing,
}

/// Try each top-level `{...}` in `text` until one is a usable object.
fn first_usable_object(text: &str) -> Candidate {
    let mut saw_any = false;
    let mut offset = 0;
    while let Some(rel) = text[offset..].find('{') {
        let start = offset + rel;
        saw_any = true;
        // An unclosed or malformed brace may sit in prose before the real
        // object, so resume at the next `{` rather than giving up.
        let Some(end) = balanced_object_end(text, start) else {
            offset = start + 1;
            continue;
        };
        match serde_json::from_str::<Value>(&text[start..=end]) {
            Ok(Value::Object(map)) => {
                if let Some(drafts) = drafts_from_object(&map) {
                    return Candidate::Usable(drafts);
                }
                offset = end + 1;
            }
            _ => offset = start + 1,
        }
    }
    if saw_any {
        Candidate::Unusable
    } else {
        Candidate::Missing
    }
}

/// Byte index of the `}` closing the object opened at `start`, matching
/// braces outside of string literals.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn drafts_from_object(map: &Map<String, Value>) -> Option<Vec<Draft>> {
    if let Some(Value::Array(items)) = map.get("observations") {
        return Some(items.iter().map(draft_from_item).collect());
    }

    let delta = map.get("delta").and_then(Value::as_array);
    let assumptions = map.get("assumptions").and_then(Value::as_array);
    let conflicts = map.get("conflicts").and_then(Value::as_array);
    if delta.is_none() && assumptions.is_none() && conflicts.is_none() {
        return None;
    }

    let mut drafts = Vec::new();
    for (i, item) in delta.into_iter().flatten().enumerate() {
        let mut d = draft_from_item(item);
        d.id = Some(format!("Δ{}", i + 1));
        d.kind = Some("gap".to_string());
        drafts.push(d);
    }
    for (i, item) in assumptions.into_iter().flatten().enumerate() {
        let mut d = draft_from_item(item);
        d.id = Some(format!("A{}", i + 1));
        d.kind = Some("missing_assumption".to_string());
        if d.description.is_none() {
            d.description = str_field(item, "assumption");
        }
        drafts.push(d);
    }
    for (i, item) in conflicts.into_iter().flatten().enumerate() {
        let mut d = draft_from_item(item);
        d.id = Some(format!("C{}", i + 1));
        d.kind = Some("tension".to_string());
        if d.description.is_none() {
            d.description = str_field(item, "conflict");
        }
        if d.spans.is_empty() {
            d.spans = item.get("locations").map(span_list).unwrap_or_default();
        }
        drafts.push(d);
    }
    Some(drafts)
}

fn draft_from_item(item: &Value) -> Draft {
    let Value::Object(_) = item else {
        return Draft {
            description: scalar_string(item),
            ..Draft::default()
        };
    };

    let mut spans = item.get("spans").map(span_list).unwrap_or_default();
    if spans.is_empty() {
        // v2 schema anchors are usually `ref-N`; keep them only if they cite a span.
        if let Some(anchor) = str_field(item, "anchor") {
            if Span::parse_id(&anchor).is_some() {
                spans.push(anchor);
            }
        }
    }

    Draft {
        id: str_field(item, "id"),
        kind: str_field(item, "type"),
        description: str_field(item, "description").or_else(|| str_field(item, "text")),
        spans,
        status: str_field(item, "status"),
        reference: str_field(item, "reference"),
        context: str_field(item, "context"),
        basis: str_field(item, "basis"),
        severity: str_field(item, "severity"),
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
    .filter(|s| !s.trim().is_empty())
}

fn str_field(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(scalar_string)
}

/// Span ids from an array, or from a comma-separated string.
fn span_list(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_string)
            .map(|s| s.trim().to_string())
            .collect(),
        Value::String(s) => split_locations(s),
        _ => Vec::new(),
    }
}

fn split_locations(s: &str) -> Vec<String> {
    s.split(',')
        .map(|l| l.trim().replace('"', ""))
        .filter(|l| !l.is_empty())
        .collect()
}

fn legacy_scan(reply: &str) -> Vec<Draft> {
    let patterns = legacy_patterns();
    let mut drafts = Vec::new();

    for (i, caps) in patterns.delta.captures_iter(reply).enumerate() {
        drafts.push(Draft {
            id: Some(format!("Δ{}", i + 1)),
            kind: Some("gap".to_string()),
            severity: caps.get(1).map(|m| m.as_str().to_lowercase()),
            description: caps.get(2).map(|m| m.as_str().to_string()),
            context: caps.get(3).map(|m| m.as_str().to_string()),
            ..Draft::default()
        });
    }
    for (i, caps) in patterns.assumption.captures_iter(reply).enumerate() {
        drafts.push(Draft {
            id: Some(format!("A{}", i + 1)),
            kind: Some("missing_assumption".to_string()),
            description: caps.get(1).map(|m| m.as_str().to_string()),
            basis: caps.get(2).map(|m| m.as_str().to_string()),
            ..Draft::default()
        });
    }
    for (i, caps) in patterns.conflict.captures_iter(reply).enumerate() {
        drafts.push(Draft {
            id: Some(format!("C{}", i + 1)),
            kind: Some("tension".to_string()),
            description: caps.get(1).map(|m| m.as_str().to_string()),
            spans: caps
                .get(2)
                .map(|m| split_locations(m.as_str()))
                .unwrap_or_default(),
            ..Draft::default()
        });
    }

    drafts
}

fn normalize(drafts: Vec<Draft>, millis: i64) -> Vec<Observation> {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(drafts.len());

    for (idx, d) in drafts.into_iter().enumerate() {
        let base = d
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("obs-{millis}-{idx}"));
        let id = unique_id(&base, &mut used);

        let description = d
            .description
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());

        let mut obs = Observation::new(
            id,
            ObservationType::from_label(d.kind.as_deref().unwrap_or("")),
            description,
        );
        obs.spans = d.spans;
        obs.status = d
            .status
            .as_deref()
            .and_then(ObservationStatus::parse)
            .unwrap_or_default();
        obs.reference = d.reference;
        obs.context = d.context;
        obs.basis = d.basis;
        obs.severity = d.severity.map(|s| s.to_lowercase());
        out.push(obs);
    }
    out
}

fn unique_id(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
