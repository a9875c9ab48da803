//! HTTP model providers (reqwest).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{retry_with_backoff, LlmConfig, ModelClient, ModelError, Provider, RETRY_BASE_DELAY};

#[cfg(feature = "anthropic")]
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct HttpModelClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl HttpModelClient {
    pub fn new(config: LlmConfig) -> Result<Self, ModelError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ModelError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn call_once(&self, system: &str, user: &str) -> Result<String, ModelError> {
        match self.config.provider {
            #[cfg(feature = "anthropic")]
            Provider::Anthropic => self.anthropic_messages(system, user).await,
            #[cfg(feature = "openai")]
            Provider::OpenAi => self.chat_completions(system, user).await,
            #[cfg(feature = "local")]
            Provider::Local => self.chat_completions(system, user).await,
            other => Err(ModelError::FeatureDisabled(other.as_str())),
        }
    }

    #[cfg(feature = "anthropic")]
    async fn anthropic_messages(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let base_url = normalize_http_base_url(&self.config.base_url, super::DEFAULT_ANTHROPIC_BASE_URL);
        let url = format!("{base_url}/v1/messages");
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_output_tokens,
            "temperature": 0,
            "system": system,
            "messages": [
                { "role": "user", "content": user }
            ]
        });

        let mut req = self
            .client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.header("x-api-key", key);
        }

        let v = self.send(req, &url).await?;
        anthropic_extract_output_text(&v).ok_or_else(|| {
            ModelError::InvalidResponse("anthropic: no text blocks in response".to_string())
        })
    }

    #[cfg(any(feature = "openai", feature = "local"))]
    async fn chat_completions(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let default = match self.config.provider {
            Provider::Local => super::DEFAULT_LOCAL_BASE_URL,
            _ => super::DEFAULT_OPENAI_BASE_URL,
        };
        let base_url = normalize_http_base_url(&self.config.base_url, default);
        let url = format!("{base_url}/v1/chat/completions");
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_output_tokens,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let v = self.send(req, &url).await?;
        chat_extract_output_text(&v).ok_or_else(|| {
            ModelError::InvalidResponse("chat completion had no message content".to_string())
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder, url: &str) -> Result<Value, ModelError> {
        debug!(%url, provider = self.config.provider.as_str(), "calling model");
        let resp = req.send().await.map_err(|e| self.transport_error(e, url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Http {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("invalid JSON: {e}")))
    }

    fn transport_error(&self, e: reqwest::Error, url: &str) -> ModelError {
        if e.is_timeout() {
            let secs = self.config.timeout.map(|t| t.as_secs()).unwrap_or(0);
            ModelError::Timeout(secs)
        } else {
            ModelError::Transport(format!("{url}: {e}"))
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError> {
        retry_with_backoff(self.config.max_retries, RETRY_BASE_DELAY, || {
            self.call_once(system, user)
        })
        .await
    }

    fn name(&self) -> &str {
        self.config.provider.as_str()
    }
}

fn normalize_http_base_url(base_url: &str, default: &str) -> String {
    let mut host = base_url.trim().to_string();
    if host.is_empty() {
        host = default.to_string();
    }
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("https://{host}");
    }
    let host = host.trim_end_matches('/');
    host.strip_suffix("/v1").unwrap_or(host).to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg_attr(not(feature = "anthropic"), allow(dead_code))]
fn anthropic_extract_output_text(v: &Value) -> Option<String> {
    let mut out = String::new();
    let blocks = v.get("content")?.as_array()?;
    for b in blocks {
        if b.get("type").and_then(Value::as_str) != Some("text") {
            continue;
        }
        if let Some(t) = b.get("text").and_then(Value::as_str) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(t);
        }
    }
    let trimmed = out.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg_attr(not(any(feature = "openai", feature = "local")), allow(dead_code))]
fn chat_extract_output_text(v: &Value) -> Option<String> {
    let text = v
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()?
        .trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls_are_normalized() {
        assert_eq!(
            normalize_http_base_url("", "https://api.openai.com"),
            "https://api.openai.com"
        );
        assert_eq!(
            normalize_http_base_url("localhost:8000/v1/", "x"),
            "https://localhost:8000"
        );
        assert_eq!(
            normalize_http_base_url("http://127.0.0.1:8080/", "x"),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn anthropic_text_blocks_are_joined() {
        let v = json!({"content": [
            {"type": "text", "text": "{\"observations\":"},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "[]}"}
        ]});
        assert_eq!(
            anthropic_extract_output_text(&v).as_deref(),
            Some("{\"observations\":\n[]}")
        );
        assert_eq!(anthropic_extract_output_text(&json!({"content": []})), None);
    }

    #[test]
    fn chat_content_is_extracted() {
        let v = json!({"choices": [{"message": {"role": "assistant", "content": " hi "}}]});
        assert_eq!(chat_extract_output_text(&v).as_deref(), Some("hi"));
        assert_eq!(chat_extract_output_text(&json!({"choices": []})), None);
    }
}
