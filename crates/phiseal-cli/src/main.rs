//! PhiSeal CLI
//!
//! One binary for:
//! - Serving the review API over HTTP (`serve`)
//! - Running a review offline against a local file (`analyze`)
//! - Inspecting the pieces of a review (`spans`, `parse`, `lint`)
//! - Producing and checking sealed bundles (`seal`, `verify`)

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use phiseal_ingest_docs::{ConverterCommand, DocumentExtractor};
use phiseal_review::llm::{create_client, llm_max_retries, llm_timeout, LlmConfig, Provider};
use phiseal_review::prompt::load_system_prompt;
use phiseal_review::{ModelClient, PromptComposer, Reviewer};

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "phiseal")]
#[command(
    author,
    version,
    about = "PhiSeal: structural document review with sealed audit trails"
)]
struct Cli {
    /// Log filter in `tracing` EnvFilter syntax (e.g. `info`, `phiseal_review=debug`).
    #[arg(long, global = true, env = "RUST_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the review API (`/analyze`, `/v1/analyze`, `/seal`, `/resolve`, `/manifests`).
    Serve(ServeArgs),

    /// Review a local PDF/DOCX and write the analysis outcome.
    Analyze(AnalyzeArgs),

    /// Print the span index of a document.
    Spans(SpansArgs),

    /// Parse a saved model reply into observations.
    Parse(ParseArgs),

    /// Check text for verdict language.
    Lint(LintArgs),

    /// Seal an analysis log and document into a bundle directory.
    Seal(SealArgs),

    /// Re-check the digests of a sealed bundle directory.
    Verify(VerifyArgs),
}

#[derive(Args, Debug, Clone)]
pub(crate) struct ModelArgs {
    /// Model provider: anthropic, openai, local or mock. Auto-detected from
    /// API key env vars when omitted.
    #[arg(long, env = "PHISEAL_PROVIDER")]
    provider: Option<String>,

    /// Override the provider's default model name.
    #[arg(long)]
    model: Option<String>,

    /// Canned reply for `--provider mock`.
    #[arg(long, conflicts_with = "mock_reply_file")]
    mock_reply: Option<String>,

    /// File holding the canned reply for `--provider mock`.
    #[arg(long)]
    mock_reply_file: Option<PathBuf>,

    /// Model-call timeout in seconds (0 disables). Defaults to
    /// `PHISEAL_LLM_TIMEOUT_SECS` or 120.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Retries for transient model failures. Defaults to
    /// `PHISEAL_LLM_MAX_RETRIES` or 2.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Replace the built-in system prompt with the contents of this file.
    #[arg(long, env = "PHISEAL_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct ExtractArgs {
    /// DOCX converter command line; `{input}` is replaced by the file path.
    /// An empty value disables DOCX.
    #[arg(long, env = "PHISEAL_DOCX_COMMAND")]
    docx_command: Option<String>,

    /// Converter timeout in seconds.
    #[arg(long, default_value_t = phiseal_ingest_docs::extract::DEFAULT_EXTRACT_TIMEOUT_SECS)]
    extract_timeout_secs: u64,
}

#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    /// Address to listen on (`127.0.0.1:0` picks a free port).
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,

    /// Write `{addr, pid}` JSON here once the listener is bound.
    #[arg(long)]
    ready_file: Option<PathBuf>,

    /// Persist manifests in this directory instead of process memory.
    #[arg(long, env = "PHISEAL_MANIFEST_DIR")]
    store_dir: Option<PathBuf>,

    /// Reject request bodies larger than this.
    #[arg(long, default_value_t = server::DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    extract: ExtractArgs,
}

#[derive(Args, Debug)]
pub(crate) struct AnalyzeArgs {
    /// PDF or DOCX file to review.
    file: PathBuf,

    /// Review intent: what the reviewer wants to learn.
    #[arg(long)]
    intent: String,

    /// Optional scope restriction.
    #[arg(long)]
    scope: Option<String>,

    /// Declared type (`pdf`, `docx` or a MIME type); defaults to the extension.
    #[arg(long, default_value = "")]
    file_type: String,

    /// Use the legacy Δ/A/C prompt instead of the observations prompt.
    #[arg(long)]
    legacy: bool,

    /// Allow observations without span references.
    #[arg(long)]
    allow_missing_spans: bool,

    /// Write document.txt, span_map.json, analysis_log.json and outcome.json here.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    extract: ExtractArgs,
}

#[derive(Args, Debug)]
pub(crate) struct SpansArgs {
    /// PDF/DOCX file, or a plain-text file with `--text`.
    file: PathBuf,

    /// Treat the input as already-extracted UTF-8 text.
    #[arg(long)]
    text: bool,

    #[arg(long, default_value = "")]
    file_type: String,

    /// Print the span map as JSON.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    extract: ExtractArgs,
}

#[derive(Args, Debug)]
pub(crate) struct ParseArgs {
    /// File holding the raw model reply (`-` for stdin).
    reply: PathBuf,

    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct LintArgs {
    /// Text file to scan (`-` for stdin).
    input: PathBuf,

    /// Exit with an error when verdict language is found.
    #[arg(long)]
    strict: bool,
}

#[derive(Args, Debug)]
pub(crate) struct SealArgs {
    /// analysis_log.json written by `analyze`.
    #[arg(long)]
    log: PathBuf,

    /// The extracted document text the log refers to.
    #[arg(long)]
    document: PathBuf,

    /// span_map.json written by `analyze`; recomputed without pages if omitted.
    #[arg(long)]
    spans: Option<PathBuf>,

    /// Free-text note stored in the seal record.
    #[arg(long)]
    note: Option<String>,

    /// Bundle output directory.
    #[arg(long)]
    out_dir: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct VerifyArgs {
    /// Bundle directory written by `seal`.
    dir: PathBuf,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// Build the model client and prompt composer from CLI/env settings.
pub(crate) fn build_reviewer(args: &ModelArgs) -> Result<Reviewer<Arc<dyn ModelClient>>> {
    let provider = match args.provider.as_deref() {
        Some(name) => Some(Provider::parse(name).ok_or_else(|| {
            anyhow!("unknown provider {name:?} (expected anthropic, openai, local or mock)")
        })?),
        None => None,
    };

    let mut config = LlmConfig::from_env(provider)?;
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if args.timeout_secs.is_some() {
        config.timeout = llm_timeout(args.timeout_secs)?;
    }
    if args.max_retries.is_some() {
        config.max_retries = llm_max_retries(args.max_retries)?;
    }

    let mock_reply = match (&args.mock_reply, &args.mock_reply_file) {
        (Some(reply), _) => Some(reply.clone()),
        (None, Some(path)) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read mock reply {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let composer = match &args.system_prompt {
        Some(path) => PromptComposer::new().with_system_prompt(
            load_system_prompt(path)
                .with_context(|| format!("failed to read system prompt {}", path.display()))?,
        ),
        None => PromptComposer::new(),
    };

    let client = create_client(&config, mock_reply)?;
    tracing::info!(
        provider = config.provider.as_str(),
        model = %config.model,
        timeout = ?config.timeout,
        max_retries = config.max_retries,
        "model client ready"
    );
    Ok(Reviewer::new(client).with_composer(composer))
}

pub(crate) fn build_extractor(args: &ExtractArgs) -> DocumentExtractor {
    let mut extractor =
        DocumentExtractor::new().with_timeout(Duration::from_secs(args.extract_timeout_secs));
    if let Some(line) = &args.docx_command {
        extractor = extractor.with_docx_command(ConverterCommand::parse(line));
    }
    extractor
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Serve(args) => server::cmd_serve(args),
        Commands::Analyze(args) => commands::cmd_analyze(args),
        Commands::Spans(args) => commands::cmd_spans(args),
        Commands::Parse(args) => commands::cmd_parse(args),
        Commands::Lint(args) => commands::cmd_lint(args),
        Commands::Seal(args) => commands::cmd_seal(args),
        Commands::Verify(args) => commands::cmd_verify(args),
    }
}
