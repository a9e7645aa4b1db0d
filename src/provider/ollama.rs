//! Adapter for local inference via Ollama's native API.
//!
//! Dispatches through `/api/generate` with `format: "json"` when the
//! prompt expects structured output. Exposes a cheap `/api/tags` probe so
//! the gateway can skip an offline local daemon without burning a full
//! dispatch timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{
    classify_reqwest, error_from_response, ProviderAdapter, RawReply, TransportError,
    TransportErrorKind,
};
use crate::content::GenerationParams;
use crate::template::{OutputFormat, RenderedPrompt};

/// Local Ollama adapter.
#[derive(Debug, Clone)]
pub struct OllamaAdapter {
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaAdapter {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Override the per-request timeout (local models can be slow to load).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_body(&self, prompt: &RenderedPrompt, params: &GenerationParams) -> Value {
        let mut body = json!({
            "model": self.model,
            "prompt": prompt.text,
            "stream": false,
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_tokens,
            },
        });
        if prompt.format == OutputFormat::StructuredJson {
            body["format"] = json!("json");
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn dispatch(
        &self,
        client: &Client,
        prompt: &RenderedPrompt,
        params: &GenerationParams,
    ) -> std::result::Result<RawReply, TransportError> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = self.build_body(prompt, params);

        let resp = client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                TransportError::new(classify_reqwest(&e), format!("ollama at {}: {}", url, e))
            })?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let reply: Value = resp.json().await.map_err(|e| {
            TransportError::new(TransportErrorKind::MalformedReply, e.to_string())
        })?;
        let text = reply
            .get("response")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TransportError::new(
                    TransportErrorKind::MalformedReply,
                    "ollama reply missing 'response' field",
                )
            })?;

        Ok(RawReply::from_text(text.to_string()))
    }

    async fn check_availability(&self, client: &Client) -> bool {
        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        match client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
