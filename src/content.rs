//! Canonical data shapes: content items in, analysis results out.
//!
//! [`AnalysisResult`] is the single normalized output schema every
//! provider's reply is converted into. Its invariant: every field has a
//! defined default (empty string / empty list / 0.0), so a partially
//! recovered reply never produces a missing field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A content item supplied by the file-discovery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable identifier of the item.
    pub id: String,
    /// Display name (usually a file name).
    pub name: String,
    /// Full content text.
    pub content: String,
    /// Short preview of the content.
    pub preview: String,
    /// Last-modified timestamp, as supplied by the collaborator.
    pub last_modified: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let preview: String = content.chars().take(200).collect();
        Self {
            id: id.into(),
            name: name.into(),
            content,
            preview,
            last_modified: Utc::now(),
        }
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = preview.into();
        self
    }

    pub fn with_last_modified(mut self, when: DateTime<Utc>) -> Self {
        self.last_modified = when;
        self
    }
}

/// Generation parameters passed through to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

impl GenerationParams {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }
}

/// One analysis request, created when an item enters the queue and
/// destroyed when it resolves.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// The content item under analysis.
    pub item: ContentItem,
    /// Which template produced the prompt.
    pub template_id: String,
    /// Generation parameters resolved from the template.
    pub params: GenerationParams,
    /// When the request entered the queue.
    pub enqueued_at: DateTime<Utc>,
}

/// The canonical analysis output — the only record surfaced to external
/// collaborators.
///
/// `provider` and `completed_at` are always stamped from call context,
/// never parsed out of the reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Label describing what kind of analysis this is (e.g. "document").
    pub analysis_type: String,
    /// Free-text summary of the content.
    pub summary: String,
    /// Ordered list of extracted insight strings.
    pub insights: Vec<String>,
    /// Suggested category labels.
    pub categories: Vec<String>,
    /// Relevance score, always clamped to [0, 1].
    pub relevance: f64,
    /// Identifier of the provider that actually produced the reply. May
    /// differ from the configured active provider after failover.
    pub provider: String,
    /// When normalization completed.
    pub completed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// A result with every field at its defined default, stamped with the
    /// given provider. The normalizer starts from this and fills in
    /// whatever it can recover.
    pub fn empty(provider: impl Into<String>) -> Self {
        Self {
            analysis_type: String::new(),
            summary: String::new(),
            insights: Vec::new(),
            categories: Vec::new(),
            relevance: 0.0,
            provider: provider.into(),
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_item_derives_preview() {
        let item = ContentItem::new("id-1", "notes.md", "a".repeat(500));
        assert_eq!(item.preview.len(), 200);
    }

    #[test]
    fn empty_result_satisfies_defaults() {
        let r = AnalysisResult::empty("mock");
        assert_eq!(r.analysis_type, "");
        assert_eq!(r.summary, "");
        assert!(r.insights.is_empty());
        assert!(r.categories.is_empty());
        assert_eq!(r.relevance, 0.0);
        assert_eq!(r.provider, "mock");
    }

    #[test]
    fn generation_params_builder() {
        let p = GenerationParams::default()
            .with_temperature(0.7)
            .with_max_tokens(2048);
        assert_eq!(p.temperature, 0.7);
        assert_eq!(p.max_tokens, 2048);
    }
}
