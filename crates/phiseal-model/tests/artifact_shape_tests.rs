//! JSON shape of exported artifacts.
//!
//! External tools read these files directly, so field names are part of the
//! contract.

use chrono::{TimeZone, Utc};
use phiseal_model::*;

fn fixed_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn sample_log() -> AnalysisLog {
    AnalysisLog {
        phiseal_version: PHISEAL_VERSION.to_string(),
        review_id: "review_1_abc".to_string(),
        created_at: fixed_time(),
        intent: ReviewIntent::new("Check assumptions"),
        constraints: ReviewConstraints::default(),
        operators: OperatorState {
            phase: ReviewPhase::Delta,
            omega_locked_at: Some(fixed_time()),
            delta_count: 1,
            phi_actions: 0,
            psi_ready: false,
        },
        observations: vec![Observation::new(
            "o1",
            ObservationType::MissingAssumption,
            "Demand constancy is assumed without support",
        )
        .with_spans(["p1.s2"])],
    }
}

#[test]
fn analysis_log_field_names() {
    let v = serde_json::to_value(sample_log()).unwrap();
    for key in [
        "phiseal_version",
        "review_id",
        "created_at",
        "intent",
        "constraints",
        "operators",
        "observations",
    ] {
        assert!(v.get(key).is_some(), "missing {key}");
    }
    assert_eq!(v["operators"]["phase"], "Δ");
    assert_eq!(v["observations"][0]["type"], "missing_assumption");
    assert_eq!(v["created_at"], "2025-03-01T12:00:00Z");
}

#[test]
fn analysis_log_round_trips_through_json() {
    let log = sample_log();
    let json = canonical_json(&log).unwrap();
    let back: AnalysisLog = serde_json::from_str(&json).unwrap();
    assert_eq!(back, log);
    assert_eq!(canonical_json(&back).unwrap(), json);
}

#[test]
fn manifest_entries_use_prefixed_digests() {
    let index = ManifestIndex {
        review_id: "r".to_string(),
        bundle_version: BUNDLE_VERSION.to_string(),
        sealed_at: fixed_time(),
        files: vec![ManifestFile {
            name: "document.txt".to_string(),
            sha256: Digest::of_text("hello"),
        }],
    };
    let v = serde_json::to_value(&index).unwrap();
    let digest = v["files"][0]["sha256"].as_str().unwrap();
    assert!(digest.starts_with(SHA256_PREFIX));
    assert!(index.file("document.txt").is_some());
    assert!(index.file("missing.txt").is_none());
}

#[test]
fn legacy_bare_hex_manifest_still_parses() {
    let hex = Digest::of_text("hello").hex();
    let raw = format!(
        r#"{{"review_id":"r","bundle_version":"1.0","sealed_at":"2025-03-01T12:00:00Z","files":[{{"name":"a","sha256":"{hex}"}}]}}"#
    );
    let index: ManifestIndex = serde_json::from_str(&raw).unwrap();
    assert_eq!(index.files[0].sha256, Digest::of_text("hello"));
}
