use std::time::Duration;

use thiserror::Error;

use crate::provider::TransportError;

/// A single failed attempt recorded while walking the provider chain.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    /// Identifier of the provider that was tried.
    pub provider: String,
    /// Why the attempt failed (transport classification or governor denial).
    pub reason: String,
    /// Wait hint from the provider or governor (Retry-After header, window
    /// remainder). The retry scheduler honors the largest hint present.
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

/// Errors produced by the orchestration layer and its components.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A declared template slot could not be resolved from the content item
    /// or caller context. Caller error — propagates synchronously.
    #[error("template '{template}' has unresolved slot '{{{slot}}}'")]
    UnresolvedSlot { template: String, slot: String },

    /// Attempted mutation or removal of a built-in template.
    #[error("template '{0}' is built-in and cannot be modified or removed")]
    ImmutableTemplate(String),

    /// The requested template id is not in the catalog.
    #[error("unknown template '{0}'")]
    UnknownTemplate(String),

    /// The requested provider id is not configured.
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// A single provider dispatch failed. Recovered by the gateway via
    /// failover; never surfaces past it.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Every provider in the chain failed for this call. Carries the
    /// per-provider failure list in the order attempted.
    #[error("all {} providers exhausted: {}", .failures.len(), format_failures(.failures))]
    Exhausted { failures: Vec<ProviderFailure> },

    /// Invalid configuration detected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The key-value store collaborator failed. Absence of a key is NOT an
    /// error — this covers storage-level faults only.
    #[error("store error: {0}")]
    Store(String),

    /// JSON serialization failed at the serde level.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TransportErrorKind;

    #[test]
    fn exhausted_lists_providers_in_order() {
        let err = OrchestratorError::Exhausted {
            failures: vec![
                ProviderFailure {
                    provider: "ollama".into(),
                    reason: "unreachable".into(),
                    retry_after: None,
                },
                ProviderFailure {
                    provider: "openai".into(),
                    reason: "rate-limited".into(),
                    retry_after: Some(Duration::from_secs(30)),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 providers"));
        let ollama_pos = msg.find("ollama").unwrap();
        let openai_pos = msg.find("openai").unwrap();
        assert!(ollama_pos < openai_pos);
    }

    #[test]
    fn transport_error_converts() {
        let transport = TransportError::new(TransportErrorKind::Timeout, "request timed out");
        let err: OrchestratorError = transport.into();
        assert!(matches!(err, OrchestratorError::Transport(_)));
    }
}
