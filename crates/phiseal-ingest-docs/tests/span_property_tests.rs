//! Property tests for the span mapper.
//!
//! 1. Spans are in bounds, non-empty and back to back
//! 2. Ids are unique and match paragraph/sentence numbering
//! 3. Every char is covered by exactly one span
//! 4. Mapping is deterministic

use std::collections::HashSet;

use phiseal_ingest_docs::{map_spans, PageBoundary};
use phiseal_model::Span;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn sentence_strategy() -> impl Strategy<Value = String> {
    ("[A-Za-z0-9Δψ ,'\"]{1,30}", prop_oneof![Just("."), Just("!"), Just("?"), Just("")])
        .prop_map(|(body, stop)| format!("{body}{stop}"))
}

fn paragraph_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(sentence_strategy(), 1..5).prop_map(|s| s.join(" "))
}

fn document_strategy() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(paragraph_strategy(), 0..6),
        prop_oneof![Just("\n\n"), Just("\n \n"), Just("\n\t\n\n")],
        "[ \n]{0,3}",
    )
        .prop_map(|(paras, sep, pad)| format!("{pad}{}{pad}", paras.join(sep)))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn spans_are_in_bounds_and_ordered(text in document_strategy()) {
        let len = text.chars().count();
        let map = map_spans(&text, &[]);
        let mut prev_end = 0;
        for span in map.iter() {
            prop_assert!(span.char_start < span.char_end);
            prop_assert!(span.char_end <= len);
            prop_assert_eq!(span.char_start, prev_end);
            prev_end = span.char_end;
        }
        if !map.is_empty() {
            prop_assert_eq!(prev_end, len);
        }
    }

    #[test]
    fn ids_are_unique_and_well_formed(text in document_strategy()) {
        let map = map_spans(&text, &[]);
        let mut seen = HashSet::new();
        for span in map.iter() {
            prop_assert!(seen.insert(span.span_id.clone()));
            prop_assert_eq!(
                Span::parse_id(&span.span_id),
                Some((span.paragraph, span.sentence))
            );
        }
    }

    #[test]
    fn spans_cover_the_whole_text(text in "[a-z .!?\n]{0,120}") {
        let chars: Vec<char> = text.chars().collect();
        let map = map_spans(&text, &[]);
        let mut covered = vec![false; chars.len()];
        for span in map.iter() {
            for slot in &mut covered[span.char_start..span.char_end] {
                prop_assert!(!*slot);
                *slot = true;
            }
        }
        if text.trim().is_empty() {
            prop_assert!(map.is_empty());
        } else {
            for (i, c) in chars.iter().enumerate() {
                prop_assert!(covered[i], "char {} ({:?}) not covered", i, c);
            }
        }
    }

    #[test]
    fn mapping_is_deterministic(text in document_strategy(), split in 0usize..200) {
        let boundaries = [
            PageBoundary { page: 1, char_offset: 0 },
            PageBoundary { page: 2, char_offset: split },
        ];
        let a = map_spans(&text, &boundaries);
        let b = map_spans(&text, &boundaries);
        prop_assert_eq!(a.to_canonical_json().unwrap(), b.to_canonical_json().unwrap());
        for span in a.iter() {
            prop_assert!(span.page.is_some());
        }
    }
}
