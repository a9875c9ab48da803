//! Model client boundary.
//!
//! The pipeline only needs `complete(system, user) -> reply`. Providers:
//! - `anthropic` (feature): Messages API
//! - `openai` (feature): Chat Completions API
//! - `local` (feature): any OpenAI-compatible server (vLLM, llama.cpp, ...)
//! - `mock`: canned replies, always available
//!
//! Every HTTP call has a timeout and a bounded number of retries with
//! exponential backoff on transport errors, 429 and 5xx.

mod mock;
#[cfg(any(feature = "anthropic", feature = "openai", feature = "local"))]
mod providers;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub use mock::{MockModelClient, MockReply};
#[cfg(any(feature = "anthropic", feature = "openai", feature = "local"))]
pub use providers::HttpModelClient;

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const ANTHROPIC_MODEL_ENV: &str = "ANTHROPIC_MODEL";
pub const ANTHROPIC_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_MODEL_ENV: &str = "OPENAI_MODEL";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const LOCAL_LLM_URL_ENV: &str = "LOCAL_LLM_URL";
pub const LLM_TIMEOUT_SECS_ENV: &str = "PHISEAL_LLM_TIMEOUT_SECS";
pub const LLM_MAX_RETRIES_ENV: &str = "PHISEAL_LLM_MAX_RETRIES";

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_LOCAL_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_LOCAL_MODEL: &str = "local";

pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_LLM_MAX_RETRIES: u32 = 2;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model provider not configured: {0}")]
    NotConfigured(String),

    #[error("{0} provider not enabled in this build")]
    FeatureDisabled(&'static str),

    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("model service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to reach model service: {0}")]
    Transport(String),

    #[error("unexpected model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError>;

    /// Short label for logs and metadata.
    fn name(&self) -> &str {
        "model"
    }
}

#[async_trait]
impl<T: ModelClient + ?Sized> ModelClient for Arc<T> {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError> {
        (**self).complete(system, user).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
    Local,
    Mock,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Local => "local",
            Self::Mock => "mock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "local" => Some(Self::Local),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub max_output_tokens: u32,
}

impl LlmConfig {
    pub fn new(provider: Provider) -> Self {
        let (model, base_url) = match provider {
            Provider::Anthropic => (DEFAULT_ANTHROPIC_MODEL, DEFAULT_ANTHROPIC_BASE_URL),
            Provider::OpenAi => (DEFAULT_OPENAI_MODEL, DEFAULT_OPENAI_BASE_URL),
            Provider::Local => (DEFAULT_LOCAL_MODEL, DEFAULT_LOCAL_BASE_URL),
            Provider::Mock => ("mock", ""),
        };
        Self {
            provider,
            api_key: None,
            model: model.to_string(),
            base_url: base_url.to_string(),
            timeout: Some(Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS)),
            max_retries: DEFAULT_LLM_MAX_RETRIES,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    /// Resolve provider settings from the environment.
    ///
    /// Without an explicit provider the first configured one wins, in the
    /// order Anthropic, OpenAI, local.
    pub fn from_env(provider: Option<Provider>) -> Result<Self, ModelError> {
        let provider = match provider {
            Some(p) => p,
            None if env_nonempty(ANTHROPIC_API_KEY_ENV).is_some() => Provider::Anthropic,
            None if env_nonempty(OPENAI_API_KEY_ENV).is_some() => Provider::OpenAi,
            None if env_nonempty(LOCAL_LLM_URL_ENV).is_some() => Provider::Local,
            None => {
                return Err(ModelError::NotConfigured(format!(
                    "set {ANTHROPIC_API_KEY_ENV}, {OPENAI_API_KEY_ENV} or {LOCAL_LLM_URL_ENV}"
                )))
            }
        };

        let mut config = Self::new(provider);
        let (key_env, model_env, url_env) = match provider {
            Provider::Anthropic => (
                Some(ANTHROPIC_API_KEY_ENV),
                Some(ANTHROPIC_MODEL_ENV),
                Some(ANTHROPIC_BASE_URL_ENV),
            ),
            Provider::OpenAi => (
                Some(OPENAI_API_KEY_ENV),
                Some(OPENAI_MODEL_ENV),
                Some(OPENAI_BASE_URL_ENV),
            ),
            Provider::Local => (None, None, Some(LOCAL_LLM_URL_ENV)),
            Provider::Mock => (None, None, None),
        };

        if let Some(key_env) = key_env {
            let key = env_nonempty(key_env).ok_or_else(|| {
                ModelError::NotConfigured(format!(
                    "{} requires {key_env} (set it in your env; do not hardcode secrets)",
                    provider.as_str()
                ))
            })?;
            config.api_key = Some(key);
        }
        if let Some(model) = model_env.and_then(env_nonempty) {
            config.model = model;
        }
        if let Some(url) = url_env.and_then(env_nonempty) {
            config.base_url = url;
        }

        config.timeout = llm_timeout(None)?;
        config.max_retries = llm_max_retries(None)?;
        Ok(config)
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Effective model-call timeout: override, then `PHISEAL_LLM_TIMEOUT_SECS`,
/// then the default. `0` disables the timeout.
pub fn llm_timeout(override_secs: Option<u64>) -> Result<Option<Duration>, ModelError> {
    let secs = match override_secs {
        Some(v) => v,
        None => match env_nonempty(LLM_TIMEOUT_SECS_ENV) {
            Some(v) => v.parse::<u64>().map_err(|_| {
                ModelError::NotConfigured(format!(
                    "invalid {LLM_TIMEOUT_SECS_ENV}={v:?} (expected integer seconds; 0 disables)"
                ))
            })?,
            None => DEFAULT_LLM_TIMEOUT_SECS,
        },
    };
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

pub fn llm_max_retries(override_retries: Option<u32>) -> Result<u32, ModelError> {
    match override_retries {
        Some(v) => Ok(v),
        None => match env_nonempty(LLM_MAX_RETRIES_ENV) {
            Some(v) => v.parse::<u32>().map_err(|_| {
                ModelError::NotConfigured(format!(
                    "invalid {LLM_MAX_RETRIES_ENV}={v:?} (expected a non-negative integer)"
                ))
            }),
            None => Ok(DEFAULT_LLM_MAX_RETRIES),
        },
    }
}

/// Run `op`, retrying retryable failures up to `max_retries` extra times.
/// Delay doubles each attempt, starting at `base_delay`, capped at 8s.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = base_delay
                    .saturating_mul(2u32.saturating_pow(attempt))
                    .min(RETRY_MAX_DELAY);
                warn!(attempt = attempt + 1, max_retries, error = %e, ?delay, "retrying model call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Build the client for `config`. `mock_reply` is the canned reply used by
/// the mock provider.
pub fn create_client(
    config: &LlmConfig,
    mock_reply: Option<String>,
) -> Result<Arc<dyn ModelClient>, ModelError> {
    match config.provider {
        Provider::Mock => Ok(Arc::new(MockModelClient::always(
            mock_reply.unwrap_or_else(|| r#"{"observations":[]}"#.to_string()),
        ))),
        #[cfg(any(feature = "anthropic", feature = "openai", feature = "local"))]
        _ => Ok(Arc::new(HttpModelClient::new(config.clone())?)),
        #[cfg(not(any(feature = "anthropic", feature = "openai", feature = "local")))]
        other => Err(ModelError::FeatureDisabled(other.as_str())),
    }
}
