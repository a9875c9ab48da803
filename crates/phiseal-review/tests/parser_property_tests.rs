//! Property tests for the response parser
//!
//! 1. Any reply yields a non-empty list unless it is a valid empty JSON list
//! 2. Prose replies always take the fallback strategy
//! 3. Schema-shaped JSON is preserved field by field
//! 4. Ids are unique after normalization

use chrono::{TimeZone, Utc};
use phiseal_model::{ObservationStatus, ObservationType};
use phiseal_review::parse::{ParseStrategy, ResponseParser};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

// ============================================================================
// Strategies
// ============================================================================

fn prose_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z ,.!?'\n-]{0,200}"
}

fn kind_strategy() -> impl Strategy<Value = (&'static str, ObservationType)> {
    prop_oneof![
        Just(("missing_assumption", ObservationType::MissingAssumption)),
        Just(("ambiguity", ObservationType::Ambiguity)),
        Just(("gap", ObservationType::Gap)),
        Just(("tension", ObservationType::Tension)),
        Just(("unresolved_reference", ObservationType::UnresolvedReference)),
    ]
}

fn span_id_strategy() -> impl Strategy<Value = String> {
    (1usize..20, 1usize..20).prop_map(|(p, s)| format!("p{p}.s{s}"))
}

fn item_strategy() -> impl Strategy<Value = (&'static str, ObservationType, String, Vec<String>)> {
    (
        kind_strategy(),
        "[A-Za-z][A-Za-z ]{0,60}[A-Za-z]",
        prop::collection::vec(span_id_strategy(), 1..4),
    )
        .prop_map(|((label, kind), desc, spans)| (label, kind, desc, spans))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prose_never_yields_empty_list(reply in prose_strategy()) {
        let outcome = ResponseParser::new().parse(&reply);
        prop_assert_eq!(outcome.strategy, ParseStrategy::Fallback);
        prop_assert_eq!(outcome.observations.len(), 1);
        prop_assert_eq!(outcome.observations[0].status, ObservationStatus::Open);
    }

    #[test]
    fn arbitrary_text_never_panics(reply in any::<String>()) {
        let outcome = ResponseParser::new().parse(&reply);
        if outcome.observations.is_empty() {
            // Only a well-formed empty observation list may produce nothing.
            prop_assert!(matches!(
                outcome.strategy,
                ParseStrategy::JsonFenced | ParseStrategy::JsonRaw
            ));
        }
    }

    #[test]
    fn schema_json_is_preserved(items in prop::collection::vec(item_strategy(), 0..6), fenced in any::<bool>()) {
        let body = json!({
            "observations": items
                .iter()
                .enumerate()
                .map(|(i, (label, _, desc, spans))| json!({
                    "id": format!("o{}", i + 1),
                    "type": label,
                    "description": desc,
                    "spans": spans,
                }))
                .collect::<Vec<_>>()
        })
        .to_string();
        let reply = if fenced {
            format!("Here you go:\n```json\n{body}\n```\n")
        } else {
            body
        };

        let outcome = ResponseParser::new().parse(&reply);
        let expected = if fenced { ParseStrategy::JsonFenced } else { ParseStrategy::JsonRaw };
        prop_assert_eq!(outcome.strategy, expected);
        prop_assert_eq!(outcome.observations.len(), items.len());
        for (i, (obs, (_, kind, desc, spans))) in outcome.observations.iter().zip(&items).enumerate() {
            prop_assert_eq!(&obs.id, &format!("o{}", i + 1));
            prop_assert_eq!(&obs.kind, kind);
            prop_assert_eq!(&obs.description, desc);
            prop_assert_eq!(&obs.spans, spans);
            prop_assert_eq!(obs.status, ObservationStatus::Open);
        }
    }

    #[test]
    fn ids_are_unique(count in 1usize..8, dup in any::<bool>()) {
        let items: Vec<_> = (0..count)
            .map(|i| {
                let id = if dup { "same".to_string() } else { format!("x{i}") };
                json!({"id": id, "description": "d"})
            })
            .collect();
        let reply = json!({ "observations": items }).to_string();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let outcome = ResponseParser::new().parse_at(&reply, now);
        let ids: HashSet<_> = outcome.observations.iter().map(|o| o.id.clone()).collect();
        prop_assert_eq!(ids.len(), count);
    }
}
