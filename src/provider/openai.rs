//! Adapter for OpenAI-compatible cloud APIs.
//!
//! Covers OpenAI itself plus the many services exposing the same
//! `/v1/chat/completions` surface (Groq, Together, Mistral, vLLM, ...).
//! Requests `response_format: json_object` when the prompt expects
//! structured output.

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

/// Cloud adapter for any OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiAdapter {
    base_url: String,
    model: String,
    api_key: Option<String>,
    organization: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|k| {
                    if k.len() > 6 {
                        format!("{}***", &k[..6])
                    } else {
                        "***".to_string()
                    }
                }),
            )
            .field("organization", &self.organization)
            .finish()
    }
}

impl OpenAiAdapter {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            organization: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the API key, sent as `Authorization: Bearer {key}`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the organization header.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_body(&self, prompt: &RenderedPrompt, params: &GenerationParams) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt.text}],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "stream": false,
        });
        if prompt.format == OutputFormat::StructuredJson {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        "openai"
    }

    async fn dispatch(
        &self,
        client: &Client,
        prompt: &RenderedPrompt,
        params: &GenerationParams,
    ) -> std::result::Result<RawReply, TransportError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = self.build_body(prompt, params);

        let mut req = client.post(&url).timeout(self.timeout).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(ref org) = self.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }

        let resp = req.send().await.map_err(|e| {
            TransportError::new(classify_reqwest(&e), format!("openai at {}: {}", url, e))
        })?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let reply: Value = resp.json().await.map_err(|e| {
            TransportError::new(TransportErrorKind::MalformedReply, e.to_string())
        })?;
        let text = reply
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TransportError::new(
                    TransportErrorKind::MalformedReply,
                    "openai reply missing choices[0].message.content",
                )
            })?;

        Ok(RawReply::from_text(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(format: OutputFormat) -> RenderedPrompt {
        RenderedPrompt {
            template_id: "general".into(),
            text: "Analyze this.".into(),
            required_fields: vec!["summary".into()],
            format,
        }
    }

    #[test]
    fn structured_prompt_sets_response_format() {
        let adapter = OpenAiAdapter::new("https://api.openai.com", "gpt-4o-mini");
        let body = adapter.build_body(
            &prompt(OutputFormat::StructuredJson),
            &GenerationParams::default(),
        );
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn sections_prompt_has_no_response_format() {
        let adapter = OpenAiAdapter::new("https://api.openai.com", "gpt-4o-mini");
        let body = adapter.build_body(
            &prompt(OutputFormat::LabeledSections),
            &GenerationParams::default(),
        );
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn debug_masks_api_key() {
        let adapter = OpenAiAdapter::new("https://api.openai.com", "gpt-4o-mini")
            .with_api_key("sk-secret-key-value");
        let rendered = format!("{:?}", adapter);
        assert!(!rendered.contains("secret-key-value"));
        assert!(rendered.contains("sk-sec***"));
    }
}
