//! Observations: structurally uncertain findings about a document.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Kind of finding.
///
/// The five named kinds are the documented schema. Models do not always
/// follow it, so unknown labels are kept as `Other(tag)` rather than dropped;
/// generic defaults (`observation`, `general_observation`, `analysis`) also
/// land there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObservationType {
    MissingAssumption,
    Ambiguity,
    Gap,
    Tension,
    UnresolvedReference,
    Other(String),
}

impl ObservationType {
    /// Tag used when the model omitted a type.
    pub const DEFAULT_TAG: &'static str = "observation";

    /// Normalize a free-form label ("Missing assumption", "gap", "Conflict").
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "missing_assumption" | "missing_assumptions" | "assumption" | "assumptions" => {
                Self::MissingAssumption
            }
            "ambiguity" | "ambiguities" | "ambiguous" => Self::Ambiguity,
            "gap" | "gaps" | "delta" => Self::Gap,
            "tension" | "tensions" | "conflict" | "conflicts" | "contradiction" => Self::Tension,
            "unresolved_reference" | "unresolved_references" => Self::UnresolvedReference,
            "" => Self::Other(Self::DEFAULT_TAG.to_string()),
            _ => Self::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::MissingAssumption => "missing_assumption",
            Self::Ambiguity => "ambiguity",
            Self::Gap => "gap",
            Self::Tension => "tension",
            Self::UnresolvedReference => "unresolved_reference",
            Self::Other(tag) => tag,
        }
    }
}

impl Default for ObservationType {
    fn default() -> Self {
        Self::Other(Self::DEFAULT_TAG.to_string())
    }
}

impl fmt::Display for ObservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ObservationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ObservationType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_label(&s))
    }
}

/// Review status of an observation. Observations are never deleted, only
/// re-statused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    #[default]
    Open,
    Acknowledged,
    Resolved,
    Waived,
}

impl ObservationStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "acknowledged" => Some(Self::Acknowledged),
            "resolved" => Some(Self::Resolved),
            "waived" => Some(Self::Waived),
            _ => None,
        }
    }
}

/// A single finding tied to zero or more spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ObservationType,
    pub description: String,
    #[serde(default)]
    pub spans: Vec<String>,
    #[serde(default)]
    pub status: ObservationStatus,
    /// Free-form locator from the model ("Section 2", "Page 3").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Quoted document text the finding refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Legacy assumption format: why the assumption was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basis: Option<String>,
    /// Legacy gap format only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

impl Observation {
    pub fn new(id: impl Into<String>, kind: ObservationType, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            spans: Vec::new(),
            status: ObservationStatus::Open,
            reference: None,
            context: None,
            basis: None,
            severity: None,
        }
    }

    pub fn with_spans<I, S>(mut self, spans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spans = spans.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_spans(&self) -> bool {
        !self.spans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_normalize_to_documented_kinds() {
        assert_eq!(
            ObservationType::from_label("Missing assumption"),
            ObservationType::MissingAssumption
        );
        assert_eq!(
            ObservationType::from_label("Unresolved-Reference"),
            ObservationType::UnresolvedReference
        );
        assert_eq!(ObservationType::from_label("Conflict"), ObservationType::Tension);
        assert_eq!(ObservationType::from_label(" gap "), ObservationType::Gap);
    }

    #[test]
    fn unknown_labels_are_kept() {
        assert_eq!(
            ObservationType::from_label("General observation"),
            ObservationType::Other("general_observation".to_string())
        );
        assert_eq!(ObservationType::from_label(""), ObservationType::default());
    }

    #[test]
    fn observation_serializes_type_field() {
        let obs = Observation::new("o1", ObservationType::Gap, "No baseline given")
            .with_spans(["p1.s1"]);
        let v = serde_json::to_value(&obs).unwrap();
        assert_eq!(v["type"], "gap");
        assert_eq!(v["status"], "open");
        assert_eq!(v["spans"][0], "p1.s1");
        assert!(v.get("severity").is_none());
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(ObservationStatus::parse("Waived"), Some(ObservationStatus::Waived));
        assert_eq!(ObservationStatus::parse("closed"), None);
    }
}
