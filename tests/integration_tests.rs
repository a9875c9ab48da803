//! Integration tests for the complete PhiSeal pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Extracted text → Span map → Review (mock model) → Analysis log
//! - Analysis log → Seal bundle → Manifest store
//! - Bundle verification after storage round trips
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::tempdir;

use phiseal_ingest_docs::extract::split_pages;
use phiseal_ingest_docs::ExtractedText;
use phiseal_model::{Digest, ObservationStatus, ReviewIntent, ReviewPhase};
use phiseal_review::artifacts::{ANALYSIS_LOG_FILE, DOCUMENT_FILE, SPAN_MAP_FILE};
use phiseal_review::{
    apply_resolution, seal_review_at, MockModelClient, ModelClient, ReviewRequest, Reviewer,
    SealBundle,
};
use phiseal_storage::{FileManifestStore, ManifestStore, MemoryManifestStore};

const REPORT: &str = "Quarterly outlook\u{c}Sales will grow next year. We assume demand stays constant.\n\nCosts are expected to fall. The vendor contract is referenced in Annex B.";

const REPLY: &str = r#"Here is my review:
```json
{"observations":[
  {"id":"o1","type":"missing_assumption","description":"Demand constancy is assumed without support","spans":["p1.s2"]},
  {"id":"o2","type":"unresolved_reference","description":"Annex B is cited but not included","spans":["p2.s2"]}
]}
```"#;

fn pdf_like() -> ExtractedText {
    let (text, page_boundaries) = split_pages(REPORT);
    ExtractedText {
        text,
        page_boundaries,
        method: "fixture".to_string(),
    }
}

fn shared_reviewer() -> Reviewer<Arc<dyn ModelClient>> {
    let client: Arc<dyn ModelClient> = Arc::new(MockModelClient::always(REPLY));
    Reviewer::new(client)
}

// ============================================================================
// Review → Seal
// ============================================================================

#[tokio::test]
async fn test_pdf_review_is_paged_and_sealable() {
    let doc = pdf_like();
    let reviewer = shared_reviewer();
    let request = ReviewRequest::new(ReviewIntent::new("Check assumptions and references"));
    let at = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();

    let outcome = reviewer.analyze_at(&doc, &request, at).await.unwrap();
    assert_eq!(outcome.observations().len(), 2);
    assert!(outcome.span_warnings.is_empty(), "{:?}", outcome.span_warnings);
    assert_eq!(outcome.document_digest, Digest::of_text(&doc.text));

    let cited = outcome.spans.get("p1.s2").unwrap();
    assert_eq!(cited.page, Some(2));
    assert_eq!(
        outcome.spans.slice(&doc.text, cited),
        "We assume demand stays constant."
    );

    let mut log = outcome.analysis_log.clone();
    apply_resolution(&mut log, "o2", ObservationStatus::Resolved).unwrap();

    let sealed_at = Utc.with_ymd_and_hms(2025, 7, 1, 13, 0, 0).unwrap();
    let bundle = seal_review_at(&log, &doc.text, Some(&outcome.spans), None, sealed_at).unwrap();
    assert_eq!(bundle.seal.operators.phase, ReviewPhase::Psi);
    assert_eq!(bundle.seal.operators.delta_open, 1);
    assert_eq!(bundle.seal.hashes.document_txt, Digest::of_text(&doc.text));
    assert_eq!(
        bundle.seal.hashes.span_map,
        Digest::of_text(&outcome.spans.to_canonical_json().unwrap())
    );
    assert_eq!(
        bundle.seal.hashes.analysis_log,
        Digest::of_text(&bundle.files[ANALYSIS_LOG_FILE])
    );
    assert!(bundle.verify().valid);
}

#[tokio::test]
async fn test_tampering_is_detected_per_file() {
    let doc = pdf_like();
    let outcome = shared_reviewer()
        .analyze(&doc, &ReviewRequest::new(ReviewIntent::new("Check assumptions")))
        .await
        .unwrap();
    let bundle = seal_review_at(
        &outcome.analysis_log,
        &doc.text,
        Some(&outcome.spans),
        None,
        Utc::now(),
    )
    .unwrap();

    for name in [DOCUMENT_FILE, SPAN_MAP_FILE, ANALYSIS_LOG_FILE] {
        let mut tampered: SealBundle = bundle.clone();
        tampered
            .files
            .get_mut(name)
            .unwrap()
            .push_str(" ");
        let check = tampered.verify();
        assert!(!check.valid, "{name} edit went unnoticed");
        assert!(check.mismatches.contains(&name.to_string()), "{:?}", check.mismatches);
    }
}

// ============================================================================
// Seal → Manifest store
// ============================================================================

#[tokio::test]
async fn test_sealed_manifest_round_trips_through_stores() {
    let doc = pdf_like();
    let outcome = shared_reviewer()
        .analyze(&doc, &ReviewRequest::new(ReviewIntent::new("Check assumptions")))
        .await
        .unwrap();
    let bundle = seal_review_at(&outcome.analysis_log, &doc.text, None, None, Utc::now()).unwrap();
    let manifest_json = serde_json::to_value(&bundle.manifest).unwrap();

    let dir = tempdir().unwrap();
    let stores: Vec<Box<dyn ManifestStore>> = vec![
        Box::new(MemoryManifestStore::new()),
        Box::new(FileManifestStore::open(dir.path()).unwrap()),
    ];
    for store in &stores {
        let record = store.put(manifest_json.clone()).unwrap();
        let back = store.get(&record.id).unwrap().unwrap();
        let manifest: phiseal_model::ManifestIndex =
            serde_json::from_value(back.manifest).unwrap();
        assert_eq!(manifest, bundle.manifest);
        assert_eq!(store.list(50).unwrap().len(), 1);
    }

    let reopened = FileManifestStore::open(dir.path()).unwrap();
    assert_eq!(reopened.list(50).unwrap().len(), 1);
}
