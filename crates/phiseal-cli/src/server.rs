//! PhiSeal HTTP server.
//!
//! A small hyper server around the review pipeline and the manifest store.
//!
//! Routes
//! ------
//! - `POST /analyze`: observations prompt (current schema)
//! - `POST /v1/analyze`: legacy Δ/A/C prompt
//! - `POST /resolve`: re-status one observation (Φ)
//! - `POST /seal`: seal a log + document into a bundle (Ψ)
//! - `POST|GET|DELETE /manifests`: manifest store
//! - `GET /healthz`
//!
//! Reviews are not held server-side: every request carries the analysis log
//! it operates on, and only manifests are stored.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};
use url::form_urlencoded;

use phiseal_ingest_docs::{ExtractError, FileKind, SpanMap, TextExtractor};
use phiseal_model::{
    AnalysisLog, ObservationStatus, ReviewConstraints, ReviewIntent, PHISEAL_VERSION,
};
use phiseal_review::{
    apply_resolution, ModelClient, PromptVariant, ReviewError, ReviewRequest, Reviewer,
};
use phiseal_storage::{
    FileManifestStore, ManifestStore, MemoryManifestStore, StoreError, DEFAULT_LIST_LIMIT,
};

use crate::{build_extractor, build_reviewer, ServeArgs};

/// Uploads arrive base64-encoded inside JSON, so this is roughly 3/4 of it in file bytes.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

pub(crate) struct ServerState {
    pub reviewer: Reviewer<Arc<dyn ModelClient>>,
    pub extractor: Arc<dyn TextExtractor>,
    pub store: Arc<dyn ManifestStore>,
    pub max_body_bytes: usize,
}

pub(crate) fn cmd_serve(args: ServeArgs) -> Result<()> {
    let reviewer = build_reviewer(&args.model)?;
    let extractor: Arc<dyn TextExtractor> = Arc::new(build_extractor(&args.extract));
    let store: Arc<dyn ManifestStore> = match &args.store_dir {
        Some(dir) => Arc::new(FileManifestStore::open(dir)?),
        None => Arc::new(MemoryManifestStore::new()),
    };

    let state = Arc::new(ServerState {
        reviewer,
        extractor,
        store,
        max_body_bytes: args.max_body_bytes,
    });

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    rt.block_on(async move { serve_async(args.listen, args.ready_file, state).await })
}

async fn serve_async(
    listen: SocketAddr,
    ready_file: Option<PathBuf>,
    state: Arc<ServerState>,
) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {listen}: {e}"))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;

    info!(addr = %bound, model = state.reviewer.model().name(), "listening");
    eprintln!("serve: listening on http://{bound}");
    if let Some(path) = ready_file.as_ref() {
        let payload = json!({
            "version": "phiseal_server_ready_v1",
            "addr": bound.to_string(),
            "pid": std::process::id(),
        });
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(path, serde_json::to_string_pretty(&payload).unwrap_or_default()).ok();
    }

    loop {
        let (stream, _peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!(error = %e, "connection error");
            }
        });
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
enum ApiError {
    Validation(String),
    Unsupported(String),
    NotFound(String),
    MethodNotAllowed(&'static str),
    Conflict(String),
    PayloadTooLarge(usize),
    Service(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Unsupported(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Validation(m) | Self::Unsupported(m) | Self::NotFound(m) | Self::Conflict(m) => {
                m.clone()
            }
            Self::MethodNotAllowed(_) => "method not allowed".to_string(),
            Self::PayloadTooLarge(limit) => format!("request body exceeds {limit} bytes"),
            Self::Service(m) => m.clone(),
        }
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        let mut resp = json_error(self.status(), &self.message());
        if let Self::MethodNotAllowed(allow) = self {
            if let Ok(v) = allow.parse() {
                resp.headers_mut().insert(ALLOW, v);
            }
        }
        resp
    }
}

impl From<ExtractError> for ApiError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::UnsupportedFormat(_) | ExtractError::FeatureDisabled(_) => {
                Self::Unsupported(e.to_string())
            }
            ExtractError::NoText => Self::Validation(e.to_string()),
            ExtractError::Pdf(_) | ExtractError::Converter(_) | ExtractError::Io(_) => {
                Self::Service(e.to_string())
            }
        }
    }
}

impl From<ReviewError> for ApiError {
    fn from(e: ReviewError) -> Self {
        match e {
            ReviewError::AlreadySealed(_) => Self::Conflict(e.to_string()),
            ReviewError::Validation(_)
            | ReviewError::UnknownObservation(_)
            | ReviewError::Transition(_) => Self::Validation(e.to_string()),
            ReviewError::Model(_) | ReviewError::Artifact(_) => Self::Service(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidId(_) => Self::Validation(e.to_string()),
            StoreError::Io(_) | StoreError::Serialize(_) => Self::Service(e.to_string()),
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

/// `Allow` header value for known paths.
fn allowed_methods(path: &str) -> Option<&'static str> {
    match path {
        "/healthz" => Some("GET"),
        "/analyze" | "/v1/analyze" | "/seal" | "/resolve" => Some("POST"),
        "/manifests" => Some("GET, POST, DELETE"),
        _ => None,
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let result = match (method.clone(), path.as_str()) {
        (Method::GET, "/healthz") => Ok(text_response(StatusCode::OK, "ok\n")),
        (Method::POST, "/analyze") => match read_body(req, state.max_body_bytes).await {
            Ok(body) => handle_analyze(&state, &body, PromptVariant::V2Observations).await,
            Err(e) => Err(e),
        },
        (Method::POST, "/v1/analyze") => match read_body(req, state.max_body_bytes).await {
            Ok(body) => handle_analyze(&state, &body, PromptVariant::V1Legacy).await,
            Err(e) => Err(e),
        },
        (Method::POST, "/resolve") => match read_body(req, state.max_body_bytes).await {
            Ok(body) => handle_resolve(&body),
            Err(e) => Err(e),
        },
        (Method::POST, "/seal") => match read_body(req, state.max_body_bytes).await {
            Ok(body) => handle_seal(&body),
            Err(e) => Err(e),
        },
        (Method::POST, "/manifests") => match read_body(req, state.max_body_bytes).await {
            Ok(body) => handle_manifest_put(&state, &body),
            Err(e) => Err(e),
        },
        (Method::GET, "/manifests") => handle_manifest_get(&state, query.as_deref()),
        (Method::DELETE, "/manifests") => handle_manifest_delete(&state, query.as_deref()),
        (_, p) => match allowed_methods(p) {
            Some(allow) => Err(ApiError::MethodNotAllowed(allow)),
            None => Err(ApiError::NotFound("not found".to_string())),
        },
    };

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            if e.status().is_server_error() {
                warn!(%method, %path, error = %e.message(), "request failed");
            } else {
                info!(%method, %path, status = e.status().as_u16(), error = %e.message(), "request rejected");
            }
            e.into_response()
        }
    };
    Ok(resp)
}

async fn read_body(req: Request<Incoming>, limit: usize) -> Result<Bytes, ApiError> {
    Limited::new(req.into_body(), limit)
        .collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| {
            if e.is::<http_body_util::LengthLimitError>() {
                ApiError::PayloadTooLarge(limit)
            } else {
                ApiError::Validation(format!("failed to read request body: {e}"))
            }
        })
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &[u8], what: &str) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::Validation(format!("failed to parse {what} request JSON: {e}")))
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"internal error"))))
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value)
        .unwrap_or_else(|_| b"{\"success\":false,\"error\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| {
            Response::new(Full::new(Bytes::from_static(
                b"{\"success\":false,\"error\":\"internal\"}",
            )))
        })
}

fn json_error(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "success": false, "error": msg }))
}

fn parse_query_params(query: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(q) = query else {
        return out;
    };
    for (k, v) in form_urlencoded::parse(q.as_bytes()) {
        out.insert(k.into_owned(), v.into_owned());
    }
    out
}

// ============================================================================
// Analyze
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequestV1 {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    constraints: Option<ReviewConstraints>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Accepts bare base64 or a `data:<mime>;base64,` URL.
fn decode_upload(file: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match file.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => file,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(cleaned.as_bytes())
        .map_err(|e| ApiError::Validation(format!("file is not valid base64: {e}")))
}

async fn handle_analyze(
    state: &Arc<ServerState>,
    body: &[u8],
    variant: PromptVariant,
) -> Result<Response<Full<Bytes>>, ApiError> {
    let req: AnalyzeRequestV1 = parse_json(body, "analyze")?;
    let (Some(file), Some(file_name), Some(file_type), Some(intent)) = (
        non_empty(&req.file),
        non_empty(&req.file_name),
        non_empty(&req.file_type),
        non_empty(&req.intent),
    ) else {
        return Err(ApiError::Validation(
            "missing required fields: file, fileName, fileType, intent".to_string(),
        ));
    };

    let kind = FileKind::from_declared(file_type)?;
    let bytes = decode_upload(file)?;

    let extractor = state.extractor.clone();
    let extracted = tokio::task::spawn_blocking(move || extractor.extract(&bytes, kind))
        .await
        .map_err(|e| ApiError::Service(format!("extraction task failed: {e}")))??;

    let mut review_intent = ReviewIntent::new(intent);
    if let Some(scope) = non_empty(&req.scope) {
        review_intent = review_intent.with_scope(scope);
    }
    let request = ReviewRequest::new(review_intent)
        .with_constraints(req.constraints.unwrap_or_default())
        .with_variant(variant);

    let outcome = state.reviewer.analyze(&extracted, &request).await?;
    info!(
        review_id = %outcome.review_id,
        file = %file_name,
        observations = outcome.observations().len(),
        strategy = %outcome.parse_strategy,
        "analysis complete"
    );

    let v = json!({
        "success": true,
        "observations": outcome.observations(),
        "analysis_log": outcome.analysis_log,
        "spans": outcome.spans,
        "document_text": extracted.text,
        "verdict_warnings": outcome.verdict_warnings,
        "span_warnings": outcome.span_warnings,
        "metadata": {
            "review_id": outcome.review_id,
            "file_name": file_name,
            "file_type": kind.as_str(),
            "file_hash": outcome.document_digest,
            "extraction_method": outcome.extraction_method,
            "timestamp": outcome.analysis_log.created_at,
            "engine_version": PHISEAL_VERSION,
            "intent": outcome.analysis_log.intent.statement,
            "scope": outcome.analysis_log.intent.scope,
            "parse_strategy": outcome.parse_strategy,
            "prompt_variant": variant,
        }
    });
    Ok(json_response(StatusCode::OK, &v))
}

// ============================================================================
// Resolve / Seal
// ============================================================================

#[derive(Debug, Deserialize)]
struct ResolveRequestV1 {
    analysis_log: AnalysisLog,
    observation_id: String,
    status: String,
}

fn handle_resolve(body: &[u8]) -> Result<Response<Full<Bytes>>, ApiError> {
    let req: ResolveRequestV1 = parse_json(body, "resolve")?;
    let status = ObservationStatus::parse(&req.status).ok_or_else(|| {
        ApiError::Validation(format!(
            "invalid status {:?} (expected open, acknowledged, resolved or waived)",
            req.status
        ))
    })?;
    let mut log = req.analysis_log;
    apply_resolution(&mut log, &req.observation_id, status)?;
    Ok(json_response(
        StatusCode::OK,
        &json!({ "success": true, "analysis_log": log }),
    ))
}

#[derive(Debug, Deserialize)]
struct SealRequestV1 {
    analysis_log: AnalysisLog,
    document_text: String,
    #[serde(default)]
    spans: Option<SpanMap>,
    #[serde(default)]
    seal_note: Option<String>,
}

fn handle_seal(body: &[u8]) -> Result<Response<Full<Bytes>>, ApiError> {
    let req: SealRequestV1 = parse_json(body, "seal")?;
    let bundle = phiseal_review::seal_review_at(
        &req.analysis_log,
        &req.document_text,
        req.spans.as_ref(),
        req.seal_note,
        chrono::Utc::now(),
    )?;
    Ok(json_response(
        StatusCode::OK,
        &json!({
            "success": true,
            "seal": bundle.seal,
            "manifest": bundle.manifest,
            "files": bundle.files,
        }),
    ))
}

// ============================================================================
// Manifests
// ============================================================================

#[derive(Debug, Deserialize)]
struct ManifestPutRequestV1 {
    #[serde(default)]
    manifest: Option<Value>,
}

fn handle_manifest_put(
    state: &Arc<ServerState>,
    body: &[u8],
) -> Result<Response<Full<Bytes>>, ApiError> {
    let req: ManifestPutRequestV1 = parse_json(body, "manifest")?;
    let manifest = match req.manifest {
        Some(v @ Value::Object(_)) => v,
        _ => return Err(ApiError::Validation("manifest must be a JSON object".to_string())),
    };
    let record = state.store.put(manifest)?;
    info!(id = %record.id, "manifest stored");
    Ok(json_response(
        StatusCode::CREATED,
        &json!({ "success": true, "id": record.id, "manifest": record }),
    ))
}

fn handle_manifest_get(
    state: &Arc<ServerState>,
    query: Option<&str>,
) -> Result<Response<Full<Bytes>>, ApiError> {
    let params = parse_query_params(query);
    if let Some(id) = params.get("id").filter(|id| !id.is_empty()) {
        let record = state
            .store
            .get(id)?
            .ok_or_else(|| ApiError::NotFound(format!("manifest not found: {id}")))?;
        return Ok(json_response(
            StatusCode::OK,
            &json!({ "success": true, "manifest": record }),
        ));
    }

    let manifests = state.store.list(DEFAULT_LIST_LIMIT)?;
    Ok(json_response(
        StatusCode::OK,
        &json!({ "success": true, "count": manifests.len(), "manifests": manifests }),
    ))
}

fn handle_manifest_delete(
    state: &Arc<ServerState>,
    query: Option<&str>,
) -> Result<Response<Full<Bytes>>, ApiError> {
    let params = parse_query_params(query);
    let id = params
        .get("id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Validation("missing id query parameter".to_string()))?;
    if !state.store.delete(id)? {
        return Err(ApiError::NotFound(format!("manifest not found: {id}")));
    }
    Ok(json_response(
        StatusCode::OK,
        &json!({ "success": true, "id": id }),
    ))
}
