//! Span mapping: paragraphs → sentences → `p<n>.s<m>` anchors.
//!
//! Rules:
//! - offsets are chars into the text as extracted, and the spans tile it:
//!   the first starts at 0, each ends where the next starts, the last ends
//!   at the text length, so whitespace between sentences belongs to the
//!   sentence before it (leading whitespace to the first)
//! - paragraphs are separated by blank lines (whitespace-only lines count)
//! - a sentence ends after a run of `.`, `!`, `?` (plus closing quotes or
//!   brackets) that is followed by whitespace or the end of the paragraph;
//!   `3.5` and `e.g.x` do not split
//! - a paragraph without terminators is a single span
//! - a paragraph whose first line starts with `#` names the section for
//!   itself and everything after it, until the next heading

use phiseal_model::{Observation, Span};
use serde::{Deserialize, Serialize};

/// Start of a page in the extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBoundary {
    pub page: usize,
    pub char_offset: usize,
}

/// Ordered spans for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanMap {
    spans: Vec<Span>,
}

impl SpanMap {
    pub fn new(spans: Vec<Span>) -> Self {
        Self { spans }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter()
    }

    pub fn get(&self, span_id: &str) -> Option<&Span> {
        let span_id = span_id.trim();
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    pub fn contains(&self, span_id: &str) -> bool {
        self.get(span_id).is_some()
    }

    /// Sentence text of `span`, without the separator whitespace the span
    /// absorbs. `text` must be the text the map was built from.
    pub fn slice<'a>(&self, text: &'a str, span: &Span) -> &'a str {
        let start = char_to_byte(text, span.char_start);
        let end = char_to_byte(text, span.char_end);
        text[start..end].trim()
    }

    /// `(observation id, span id)` for every cited span not in this map.
    pub fn unknown_references(&self, observations: &[Observation]) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for obs in observations {
            for span_id in &obs.spans {
                if !self.contains(span_id) {
                    out.push((obs.id.clone(), span_id.clone()));
                }
            }
        }
        out
    }

    /// Compact JSON array; this is the exact text hashed into a seal.
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        phiseal_model::canonical_json(self)
    }
}

fn char_to_byte(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(b, _)| b)
        .unwrap_or(s.len())
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}')
}

/// Split `text` into spans.
///
/// `page_boundaries` may be empty (plain-text sources). A span's page is the
/// one its first visible char falls on.
pub fn map_spans(text: &str, page_boundaries: &[PageBoundary]) -> SpanMap {
    let chars: Vec<char> = text.chars().collect();

    let mut pages: Vec<(usize, usize)> = page_boundaries
        .iter()
        .map(|b| (b.char_offset, b.page))
        .collect();
    pages.sort();

    let mut spans: Vec<Span> = Vec::new();
    let mut section: Option<String> = None;

    for (p_idx, (ps, pe)) in paragraph_ranges(&chars).into_iter().enumerate() {
        let paragraph = p_idx + 1;

        let first_line: String = chars[ps..pe].iter().take_while(|c| **c != '\n').collect();
        if first_line.starts_with('#') {
            let heading = first_line.trim_start_matches('#').trim();
            if !heading.is_empty() {
                section = Some(heading.to_string());
            }
        }

        for (s_idx, (ss, se)) in sentence_ranges(&chars, ps, pe).into_iter().enumerate() {
            let page = pages
                .iter()
                .rev()
                .find(|(offset, _)| *offset <= ss)
                .map(|(_, page)| *page);
            let char_start = match spans.last_mut() {
                Some(prev) => {
                    prev.char_end = ss;
                    ss
                }
                None => 0,
            };
            spans.push(Span {
                span_id: Span::format_id(paragraph, s_idx + 1),
                char_start,
                char_end: se,
                paragraph,
                sentence: s_idx + 1,
                page,
                section: section.clone(),
            });
        }
    }
    if let Some(last) = spans.last_mut() {
        last.char_end = chars.len();
    }

    SpanMap { spans }
}

/// `[start, end)` of every paragraph, whitespace-trimmed.
fn paragraph_ranges(chars: &[char]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    let mut line_start = 0;
    while line_start <= chars.len() {
        let line_end = chars[line_start..]
            .iter()
            .position(|c| *c == '\n')
            .map(|p| line_start + p)
            .unwrap_or(chars.len());

        let blank = chars[line_start..line_end].iter().all(|c| c.is_whitespace());
        if blank {
            if let Some(range) = current.take() {
                out.push(range);
            }
        } else {
            current = Some(match current {
                Some((start, _)) => (start, line_end),
                None => (line_start, line_end),
            });
        }

        if line_end == chars.len() {
            break;
        }
        line_start = line_end + 1;
    }
    if let Some(range) = current {
        out.push(range);
    }

    out.into_iter()
        .filter_map(|(s, e)| trim_range(chars, s, e))
        .collect()
}

fn sentence_ranges(chars: &[char], ps: usize, pe: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = ps;
    let mut i = ps;

    while i < pe {
        if !is_terminator(chars[i]) {
            i += 1;
            continue;
        }
        let mut k = i + 1;
        while k < pe && is_terminator(chars[k]) {
            k += 1;
        }
        while k < pe && is_closer(chars[k]) {
            k += 1;
        }
        if k == pe || chars[k].is_whitespace() {
            if let Some(range) = trim_range(chars, start, k) {
                out.push(range);
            }
            start = k;
        }
        i = k;
    }
    if let Some(range) = trim_range(chars, start, pe) {
        out.push(range);
    }

    out
}

fn trim_range(chars: &[char], mut start: usize, mut end: usize) -> Option<(usize, usize)> {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    (start < end).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(map: &SpanMap) -> Vec<&str> {
        map.iter().map(|s| s.span_id.as_str()).collect()
    }

    #[test]
    fn splits_paragraphs_and_sentences() {
        let text = "Sales will grow. We assume demand stays constant.\n\nCosts are fixed!";
        let map = map_spans(text, &[]);
        assert_eq!(ids(&map), vec!["p1.s1", "p1.s2", "p2.s1"]);
        assert_eq!(map.slice(text, &map.spans()[1]), "We assume demand stays constant.");
        assert_eq!(map.slice(text, &map.spans()[2]), "Costs are fixed!");
    }

    #[test]
    fn spans_tile_the_whole_text() {
        let text = "One. Two.\n\nThree.";
        let map = map_spans(text, &[]);
        let ranges: Vec<(usize, usize)> =
            map.iter().map(|s| (s.char_start, s.char_end)).collect();
        assert_eq!(ranges, vec![(0, 5), (5, 11), (11, 17)]);
        assert_eq!(map.slice(text, &map.spans()[1]), "Two.");
    }

    #[test]
    fn surrounding_whitespace_is_absorbed() {
        let text = "\n\n   Alpha. Beta.  \n";
        let map = map_spans(text, &[]);
        assert_eq!(map.spans()[0].char_start, 0);
        assert_eq!(map.spans()[0].char_end, 12);
        assert_eq!(map.spans()[1].char_start, 12);
        assert_eq!(map.spans()[1].char_end, text.chars().count());
        assert_eq!(map.slice(text, &map.spans()[0]), "Alpha.");
        assert_eq!(map.slice(text, &map.spans()[1]), "Beta.");
    }

    #[test]
    fn paragraph_without_terminator_is_one_span() {
        let text = "A heading with no stop\n\nBody text.";
        let map = map_spans(text, &[]);
        assert_eq!(ids(&map), vec!["p1.s1", "p2.s1"]);
        assert_eq!(map.slice(text, &map.spans()[0]), "A heading with no stop");
    }

    #[test]
    fn decimals_and_inner_dots_do_not_split() {
        let text = "Growth is 3.5 percent per year. See appendix.";
        let map = map_spans(text, &[]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.slice(text, &map.spans()[0]), "Growth is 3.5 percent per year.");
    }

    #[test]
    fn closing_quotes_stay_with_sentence() {
        let text = "He said \"stop.\" Then left?! Fine";
        let map = map_spans(text, &[]);
        let slices: Vec<&str> = map.iter().map(|s| map.slice(text, s)).collect();
        assert_eq!(slices, vec!["He said \"stop.\"", "Then left?!", "Fine"]);
    }

    #[test]
    fn whitespace_only_lines_separate_paragraphs() {
        let map = map_spans("One.\n   \t\nTwo.", &[]);
        assert_eq!(ids(&map), vec!["p1.s1", "p2.s1"]);
    }

    #[test]
    fn pages_use_latest_boundary_not_after_span() {
        let text = "\nPage one text.\n\nPage two text. More.";
        let second_para = text.find("Page two").unwrap();
        let boundaries = [
            PageBoundary { page: 1, char_offset: 0 },
            PageBoundary { page: 2, char_offset: second_para },
        ];
        let map = map_spans(text, &boundaries);
        let pages: Vec<Option<usize>> = map.iter().map(|s| s.page).collect();
        assert_eq!(pages, vec![Some(1), Some(2), Some(2)]);
    }

    #[test]
    fn headings_set_sections() {
        let text = "Preamble.\n\n# Method\nWe sample.\n\nWe weigh.\n\n## Results\nIt works.";
        let map = map_spans(text, &[]);
        let sections: Vec<Option<&str>> = map.iter().map(|s| s.section.as_deref()).collect();
        assert_eq!(
            sections,
            vec![None, Some("Method"), Some("Method"), Some("Results")]
        );
    }

    #[test]
    fn non_ascii_offsets_count_chars() {
        let text = "Δ is open. Ψ is sealed.";
        let map = map_spans(text, &[]);
        assert_eq!(map.spans()[1].char_start, 11);
        assert_eq!(map.slice(text, &map.spans()[1]), "Ψ is sealed.");
    }

    #[test]
    fn empty_text_has_no_spans() {
        assert!(map_spans("   \n\n ", &[]).is_empty());
    }

    #[test]
    fn unknown_references_are_reported() {
        let map = map_spans("One. Two.", &[]);
        let obs = vec![Observation::new("o1", Default::default(), "x").with_spans(["p1.s2", "p9.s1"])];
        assert_eq!(
            map.unknown_references(&obs),
            vec![("o1".to_string(), "p9.s1".to_string())]
        );
    }
}
