//! Provider gateway: priority-chain failover over the adapters.
//!
//! One `analyze` call walks the chain starting at the active provider:
//! ask the governor for a lease, adapt the prompt to the provider's
//! output capability, dispatch, normalize. Any failure (probe, denial,
//! transport) advances to the next provider; the chain is tried at most
//! once per call, never wrapping. Reaching the end yields
//! [`Exhausted`](OrchestratorError::Exhausted) carrying the ordered
//! per-provider failure list.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::content::{AnalysisResult, GenerationParams};
use crate::error::{OrchestratorError, ProviderFailure, Result};
use crate::governor::{Admission, Denied, Governor};
use crate::normalize::normalize;
use crate::provider::{ProviderConfig, SharedAdapter};
use crate::template::{adapt_for_provider, RenderedPrompt};

/// Owns the provider chain, the governor, and the shared HTTP client.
///
/// Configuration is immutable after construction; a runtime change of
/// active provider is a new `Gateway` value via
/// [`with_active_provider`](Gateway::with_active_provider).
pub struct Gateway {
    chain: Vec<ProviderConfig>,
    adapters: HashMap<String, SharedAdapter>,
    governor: Governor,
    client: Client,
    active: String,
}

impl Gateway {
    /// Build a gateway from provider configs and their adapters. Every
    /// config must have an adapter with a matching id. The chain is
    /// ordered by priority (lower first); the active provider defaults to
    /// the head of the chain.
    pub fn new(
        configs: Vec<ProviderConfig>,
        adapters: Vec<SharedAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if configs.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "at least one provider is required".into(),
            ));
        }

        let adapters: HashMap<String, SharedAdapter> = adapters
            .into_iter()
            .map(|a| (a.id().to_string(), a))
            .collect();
        for config in &configs {
            if !adapters.contains_key(&config.id) {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "provider '{}' has no adapter",
                    config.id
                )));
            }
        }

        let governor = Governor::new(&configs, clock);
        let mut chain = configs;
        chain.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        let active = chain[0].id.clone();

        Ok(Self {
            chain,
            adapters,
            governor,
            client: Client::new(),
            active,
        })
    }

    /// A gateway identical to this one but starting the chain at `id`.
    /// Providers ahead of `id` in priority order are not consulted.
    pub fn with_active_provider(mut self, id: &str) -> Result<Self> {
        if !self.chain.iter().any(|c| c.id == id) {
            return Err(OrchestratorError::UnknownProvider(id.to_string()));
        }
        self.active = id.to_string();
        Ok(self)
    }

    /// Id of the provider the chain starts at.
    pub fn active_provider(&self) -> &str {
        &self.active
    }

    /// Provider ids in chain order, starting at the active provider.
    pub fn chain_ids(&self) -> Vec<&str> {
        let start = self.chain_start();
        self.chain[start..].iter().map(|c| c.id.as_str()).collect()
    }

    fn chain_start(&self) -> usize {
        self.chain
            .iter()
            .position(|c| c.id == self.active)
            .unwrap_or(0)
    }

    /// Run one analysis call through the chain.
    ///
    /// On success the returned result is tagged with the provider that
    /// actually produced it, which may differ from the active provider.
    pub async fn analyze(
        &self,
        prompt: &RenderedPrompt,
        params: &GenerationParams,
    ) -> Result<AnalysisResult> {
        let mut failures: Vec<ProviderFailure> = Vec::new();
        let start = self.chain_start();

        for config in &self.chain[start..] {
            let adapter = &self.adapters[&config.id];

            if !adapter.check_availability(&self.client).await {
                debug!(provider = %config.id, "skipping unavailable provider");
                failures.push(ProviderFailure {
                    provider: config.id.clone(),
                    reason: "unavailable".into(),
                    retry_after: None,
                });
                continue;
            }

            let lease = match self.governor.try_acquire(&config.id)? {
                Admission::Granted(lease) => lease,
                Admission::Denied(denied) => {
                    debug!(provider = %config.id, reason = %denied.reason(), "admission denied");
                    let retry_after = match &denied {
                        Denied::RateLimited { retry_after } => Some(*retry_after),
                        Denied::AtCapacity => None,
                    };
                    failures.push(ProviderFailure {
                        provider: config.id.clone(),
                        reason: denied.reason(),
                        retry_after,
                    });
                    continue;
                }
            };

            let adapted = adapt_for_provider(prompt, config.structured_output);
            let outcome = adapter.dispatch(&self.client, &adapted, params).await;
            drop(lease);

            match outcome {
                Ok(reply) => {
                    if config.id != self.active {
                        warn!(
                            active = %self.active,
                            used = %config.id,
                            "provider substituted during failover"
                        );
                    }
                    return Ok(normalize(&reply, &adapted.required_fields, &config.id));
                }
                Err(err) => {
                    debug!(provider = %config.id, error = %err, "dispatch failed, advancing chain");
                    failures.push(ProviderFailure {
                        provider: config.id.clone(),
                        reason: err.kind.label().to_string(),
                        retry_after: err.retry_after,
                    });
                }
            }
        }

        Err(OrchestratorError::Exhausted { failures })
    }
}
