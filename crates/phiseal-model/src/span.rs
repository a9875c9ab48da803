//! Citation anchors into extracted document text.

use serde::{Deserialize, Serialize};

/// A contiguous slice of document text.
///
/// Offsets count chars (Unicode scalar values) into the extracted document
/// text and are half-open: `char_start..char_end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// `p<paragraph>.s<sentence>`, both 1-based.
    pub span_id: String,
    pub char_start: usize,
    pub char_end: usize,
    pub paragraph: usize,
    pub sentence: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Span {
    pub fn format_id(paragraph: usize, sentence: usize) -> String {
        format!("p{paragraph}.s{sentence}")
    }

    /// Parse a `p<n>.s<m>` id into `(paragraph, sentence)`.
    pub fn parse_id(id: &str) -> Option<(usize, usize)> {
        let rest = id.trim().strip_prefix('p')?;
        let (para, sent) = rest.split_once(".s")?;
        Some((para.parse().ok()?, sent.parse().ok()?))
    }

    pub fn len(&self) -> usize {
        self.char_end.saturating_sub(self.char_start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
