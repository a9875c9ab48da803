//! Offline subcommands: analyze, spans, parse, lint, seal, verify.

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use phiseal_ingest_docs::{map_spans, FileKind, SpanMap, TextExtractor};
use phiseal_model::{AnalysisLog, ManifestIndex, ReviewConstraints, ReviewIntent, SealRecord};
use phiseal_review::artifacts::{
    ANALYSIS_LOG_FILE, DOCUMENT_FILE, MANIFEST_FILE, SEAL_FILE, SPAN_MAP_FILE,
};
use phiseal_review::{
    check_verdict_language, parse_response, seal_review_at, PromptVariant, ReviewRequest,
    SealBundle,
};

use crate::{
    build_extractor, build_reviewer, AnalyzeArgs, LintArgs, ParseArgs, SealArgs, SpansArgs,
    VerifyArgs,
};

const OUTCOME_FILE: &str = "outcome.json";

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub(crate) fn cmd_analyze(args: AnalyzeArgs) -> Result<()> {
    let bytes = fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let kind = FileKind::detect(&args.file_type, &file_name_of(&args.file))?;
    let extracted = build_extractor(&args.extract).extract(&bytes, kind)?;

    let mut intent = ReviewIntent::new(args.intent.clone());
    if let Some(scope) = &args.scope {
        intent = intent.with_scope(scope.clone());
    }
    let constraints = ReviewConstraints {
        require_span_refs: !args.allow_missing_spans,
        ..ReviewConstraints::default()
    };
    let variant = if args.legacy {
        PromptVariant::V1Legacy
    } else {
        PromptVariant::V2Observations
    };
    let request = ReviewRequest::new(intent)
        .with_constraints(constraints)
        .with_variant(variant);

    let reviewer = build_reviewer(&args.model)?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;
    let outcome = rt.block_on(reviewer.analyze(&extracted, &request))?;

    for warning in outcome.span_warnings.iter().chain(&outcome.verdict_warnings) {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }

    let outcome_json = serde_json::to_string_pretty(&outcome)?;
    match &args.out_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            write_file(dir, DOCUMENT_FILE, &extracted.text)?;
            write_file(dir, SPAN_MAP_FILE, &outcome.spans.to_canonical_json()?)?;
            write_file(
                dir,
                ANALYSIS_LOG_FILE,
                &serde_json::to_string_pretty(&outcome.analysis_log)?,
            )?;
            let out = write_file(dir, OUTCOME_FILE, &outcome_json)?;
            eprintln!(
                "{} {} ({} observations, {})",
                "wrote".green().bold(),
                out.display().to_string().bold(),
                outcome.observations().len(),
                outcome.parse_strategy
            );
        }
        None => println!("{outcome_json}"),
    }
    Ok(())
}

pub(crate) fn cmd_spans(args: SpansArgs) -> Result<()> {
    let (text, pages) = if args.text {
        (read_input(&args.file)?, Vec::new())
    } else {
        let bytes = fs::read(&args.file)
            .with_context(|| format!("failed to read {}", args.file.display()))?;
        let kind = FileKind::detect(&args.file_type, &file_name_of(&args.file))?;
        let extracted = build_extractor(&args.extract).extract(&bytes, kind)?;
        (extracted.text, extracted.page_boundaries)
    };

    let spans = map_spans(&text, &pages);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&spans)?);
        return Ok(());
    }
    for span in spans.iter() {
        let page = span.page.map(|p| format!(" [page {p}]")).unwrap_or_default();
        println!(
            "{}{} {}",
            span.span_id.cyan(),
            page,
            spans.slice(&text, span)
        );
    }
    eprintln!("{} spans", spans.len());
    Ok(())
}

pub(crate) fn cmd_parse(args: ParseArgs) -> Result<()> {
    let reply = read_input(&args.reply)?;
    let outcome = parse_response(&reply);
    if args.json {
        let v = serde_json::json!({
            "strategy": outcome.strategy,
            "observations": outcome.observations,
        });
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(());
    }
    println!("{} {}", "strategy:".bold(), outcome.strategy);
    for obs in &outcome.observations {
        let spans = if obs.spans.is_empty() {
            "-".to_string()
        } else {
            obs.spans.join(",")
        };
        println!(
            "  {} {} [{}] {}",
            obs.id.cyan(),
            obs.kind.as_str().bold(),
            spans,
            obs.description
        );
    }
    Ok(())
}

pub(crate) fn cmd_lint(args: LintArgs) -> Result<()> {
    let text = read_input(&args.input)?;
    let check = check_verdict_language(&text);
    if !check.has_violation {
        println!("{} no verdict language", "ok".green().bold());
        return Ok(());
    }
    for word in &check.violations {
        println!("{} {}", "verdict:".yellow().bold(), word);
    }
    if args.strict {
        return Err(anyhow!(
            "verdict language found: {}",
            check.violations.join(", ")
        ));
    }
    Ok(())
}

pub(crate) fn cmd_seal(args: SealArgs) -> Result<()> {
    let log: AnalysisLog = serde_json::from_str(&read_input(&args.log)?)
        .with_context(|| format!("invalid analysis log {}", args.log.display()))?;
    let document = read_input(&args.document)?;
    let spans: Option<SpanMap> = match &args.spans {
        Some(path) => Some(
            serde_json::from_str(&read_input(path)?)
                .with_context(|| format!("invalid span map {}", path.display()))?,
        ),
        None => None,
    };

    let bundle = seal_review_at(
        &log,
        &document,
        spans.as_ref(),
        args.note.clone(),
        chrono::Utc::now(),
    )?;

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    for (name, contents) in &bundle.files {
        write_file(&args.out_dir, name, contents)?;
    }
    eprintln!(
        "{} {} → {}",
        "sealed".green().bold(),
        bundle.seal.review_id,
        args.out_dir.display().to_string().bold()
    );
    println!("{}", bundle.seal.hashes.document_txt);
    Ok(())
}

/// Load a bundle directory written by `seal`.
pub(crate) fn load_bundle(dir: &Path) -> Result<SealBundle> {
    let mut files = BTreeMap::new();
    for name in [
        DOCUMENT_FILE,
        SPAN_MAP_FILE,
        ANALYSIS_LOG_FILE,
        SEAL_FILE,
        MANIFEST_FILE,
    ] {
        files.insert(name.to_string(), read_input(&dir.join(name))?);
    }
    let seal: SealRecord = serde_json::from_str(&files[SEAL_FILE])
        .with_context(|| format!("invalid {SEAL_FILE}"))?;
    let manifest: ManifestIndex = serde_json::from_str(&files[MANIFEST_FILE])
        .with_context(|| format!("invalid {MANIFEST_FILE}"))?;
    Ok(SealBundle {
        seal,
        manifest,
        files,
    })
}

pub(crate) fn cmd_verify(args: VerifyArgs) -> Result<()> {
    let bundle = load_bundle(&args.dir)?;
    let check = bundle.verify();
    if check.valid {
        println!(
            "{} {} ({} files)",
            "ok".green().bold(),
            bundle.seal.review_id,
            bundle.manifest.files.len()
        );
        return Ok(());
    }
    for name in &check.mismatches {
        println!("{} {}", "mismatch:".red().bold(), name);
    }
    Err(anyhow!(
        "seal verification failed for {}",
        args.dir.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use phiseal_model::{Observation, ObservationType};
    use phiseal_review::artifacts::create_analysis_log;
    use phiseal_review::ReviewStateMachine;

    #[test]
    fn bundle_round_trips_through_directory() {
        let now = Utc.with_ymd_and_hms(2025, 5, 5, 8, 0, 0).unwrap();
        let intent = ReviewIntent::new("Check assumptions");
        let mut machine = ReviewStateMachine::new();
        machine.lock_intent(&intent, now).unwrap();
        machine.surface_uncertainty(1).unwrap();
        let obs = Observation::new("o1", ObservationType::Gap, "Baseline missing")
            .with_spans(["p1.s1"]);
        let log = create_analysis_log(
            "review_1",
            &intent,
            &ReviewConstraints::default(),
            &machine.state(),
            &[obs],
            now,
        );

        let bundle = seal_review_at(&log, "Sales will grow.", None, None, now).unwrap();
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in &bundle.files {
            write_file(dir.path(), name, contents).unwrap();
        }

        let loaded = load_bundle(dir.path()).unwrap();
        assert_eq!(loaded, bundle);
        assert!(loaded.verify().valid);

        fs::write(dir.path().join(DOCUMENT_FILE), "Sales will fall.").unwrap();
        assert!(cmd_verify(VerifyArgs {
            dir: dir.path().to_path_buf()
        })
        .is_err());
    }
}
