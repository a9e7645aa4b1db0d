//! Adapter for Anthropic's Messages API.
//!
//! Endpoint: `/v1/messages` with `x-api-key` and `anthropic-version`
//! headers. The API has no constrained-JSON mode, so providers configured
//! with this adapter normally set `structured_output: false` and receive
//! labeled-sections prompts; structured prompts are still sent verbatim.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{
    classify_reqwest, error_from_response, ProviderAdapter, RawReply, TransportError,
    TransportErrorKind,
};
use crate::content::GenerationParams;
use crate::template::RenderedPrompt;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Cloud adapter for Anthropic's Messages API.
#[derive(Clone)]
pub struct AnthropicAdapter {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl AnthropicAdapter {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_body(&self, prompt: &RenderedPrompt, params: &GenerationParams) -> Value {
        json!({
            "model": self.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": [{"role": "user", "content": prompt.text}],
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn dispatch(
        &self,
        client: &Client,
        prompt: &RenderedPrompt,
        params: &GenerationParams,
    ) -> std::result::Result<RawReply, TransportError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = self.build_body(prompt, params);

        let mut req = client
            .post(&url)
            .timeout(self.timeout)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("x-api-key", key.as_str());
        }

        let resp = req.send().await.map_err(|e| {
            TransportError::new(classify_reqwest(&e), format!("anthropic at {}: {}", url, e))
        })?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let reply: Value = resp.json().await.map_err(|e| {
            TransportError::new(TransportErrorKind::MalformedReply, e.to_string())
        })?;
        let text = reply
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|block| block.get("text"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TransportError::new(
                    TransportErrorKind::MalformedReply,
                    "anthropic reply missing content[0].text",
                )
            })?;

        Ok(RawReply::from_text(text.to_string()))
    }
}
