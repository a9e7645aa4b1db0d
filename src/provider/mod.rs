//! Provider adapter trait and the types shared by every adapter.
//!
//! The [`ProviderAdapter`] trait abstracts over inference providers,
//! translating a [`RenderedPrompt`](crate::template::RenderedPrompt) into
//! the provider's wire format and classifying failures into a small,
//! closed [`TransportErrorKind`] set. Built-in implementations:
//! [`OllamaAdapter`] (local), [`OpenAiAdapter`], [`AnthropicAdapter`].
//!
//! Adapters never retry and never know about other providers — failover
//! lives in the [`Gateway`](crate::gateway::Gateway).

pub mod anthropic;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use mock::{MockAdapter, MockOutcome};
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::content::GenerationParams;
use crate::template::RenderedPrompt;

/// Immutable per-provider configuration, owned by the gateway.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Stable provider identifier (e.g. `"ollama"`, `"openai"`).
    pub id: String,
    /// Base endpoint URL.
    pub base_url: String,
    /// Models this provider can serve.
    pub models: Vec<String>,
    /// Model used when the caller does not pick one.
    pub default_model: String,
    /// Whether the provider reliably honors structured-output requests.
    pub structured_output: bool,
    /// Per-minute request budget enforced by the governor.
    pub requests_per_minute: u32,
    /// Maximum concurrent in-flight requests enforced by the governor.
    pub max_concurrent: u32,
    /// Rank in the failover chain; lower is tried first.
    pub priority: u32,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            models: Vec::new(),
            default_model: String::new(),
            structured_output: true,
            requests_per_minute: 60,
            max_concurrent: 4,
            priority: 0,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !self.models.contains(&model) {
            self.models.push(model.clone());
        }
        self.default_model = model;
        self
    }

    pub fn with_structured_output(mut self, supported: bool) -> Self {
        self.structured_output = supported;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// A provider's raw reply, before normalization.
///
/// Modeled as a closed sum so the normalizer's tiered algorithm is a
/// straightforward match rather than shape-sniffing.
#[derive(Debug, Clone)]
pub enum RawReply {
    /// The provider returned a well-formed JSON object.
    Structured(serde_json::Map<String, Value>),
    /// The provider returned text (possibly JSON-ish, possibly prose).
    FreeText(String),
}

impl RawReply {
    /// Wrap reply text: parses as `Structured` when the text is a JSON
    /// object, `FreeText` otherwise. Adapters that requested structured
    /// output call this on the model's message content.
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => RawReply::Structured(map),
            _ => RawReply::FreeText(text),
        }
    }
}

/// Classification of a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The per-request deadline elapsed.
    Timeout,
    /// The provider rejected our credentials (401/403).
    Auth,
    /// The provider throttled us (429).
    RateLimited,
    /// The reply arrived but could not be decoded at the wire level.
    MalformedReply,
    /// Connection-level failure or 5xx.
    Unreachable,
}

impl TransportErrorKind {
    /// Short stable label used in failure records and logs.
    pub fn label(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Auth => "auth-error",
            TransportErrorKind::RateLimited => "rate-limited",
            TransportErrorKind::MalformedReply => "malformed-reply",
            TransportErrorKind::Unreachable => "unreachable",
        }
    }
}

/// A classified dispatch failure from a single adapter.
///
/// Every kind advances the gateway to the next provider in the chain; a
/// different provider is never assumed to share the same fault.
#[derive(Debug, Clone, Error)]
#[error("{} ({})", message, kind.label())]
pub struct TransportError {
    /// Failure classification.
    pub kind: TransportErrorKind,
    /// Human-readable detail.
    pub message: String,
    /// `Retry-After` hint from the provider, if it sent one.
    pub retry_after: Option<Duration>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Abstraction over inference providers.
///
/// Object-safe; the gateway holds adapters as `Arc<dyn ProviderAdapter>`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider identifier; must match the [`ProviderConfig`] id.
    fn id(&self) -> &str;

    /// Serialize, authenticate, send, and decode one request. Enforces a
    /// per-request timeout. Never retries.
    async fn dispatch(
        &self,
        client: &Client,
        prompt: &RenderedPrompt,
        params: &GenerationParams,
    ) -> std::result::Result<RawReply, TransportError>;

    /// Cheap reachability probe. Local adapters override this so the
    /// gateway can skip them without waiting for a failed dispatch.
    async fn check_availability(&self, _client: &Client) -> bool {
        true
    }
}

/// Shared alias used across the gateway and queue.
pub type SharedAdapter = Arc<dyn ProviderAdapter>;

/// Map an HTTP status to a transport classification.
pub(crate) fn classify_status(status: u16) -> TransportErrorKind {
    match status {
        401 | 403 => TransportErrorKind::Auth,
        429 => TransportErrorKind::RateLimited,
        408 | 504 => TransportErrorKind::Timeout,
        _ => TransportErrorKind::Unreachable,
    }
}

/// Parse a `Retry-After` header value as integer seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map a reqwest error into a transport classification.
pub(crate) fn classify_reqwest(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_decode() {
        TransportErrorKind::MalformedReply
    } else {
        TransportErrorKind::Unreachable
    }
}

/// Turn a non-success HTTP response into a [`TransportError`], consuming
/// the body for the message and reading any `Retry-After` hint.
pub(crate) async fn error_from_response(resp: reqwest::Response) -> TransportError {
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = resp.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    TransportError::new(classify_status(status), format!("HTTP {}: {}", status, body))
        .with_retry_after(retry_after)
}
