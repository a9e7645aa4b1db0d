//! Scriptable mock adapter for testing without live providers.
//!
//! Outcomes are consumed in order and cycle when exhausted, so a mock can
//! stand in for an always-failing provider or a provider that recovers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{ProviderAdapter, RawReply, TransportError, TransportErrorKind};
use crate::content::GenerationParams;
use crate::template::RenderedPrompt;

/// One scripted dispatch outcome.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Return this reply text (parsed into structured/free-text).
    Reply(String),
    /// Fail with this transport classification.
    Fail(TransportErrorKind),
    /// Fail rate-limited with a Retry-After hint.
    Throttled(Duration),
}

/// A test adapter that replays scripted outcomes in order, cycling when
/// they run out.
#[derive(Debug)]
pub struct MockAdapter {
    id: String,
    outcomes: Vec<MockOutcome>,
    cursor: AtomicUsize,
    dispatches: AtomicUsize,
    available: AtomicBool,
}

impl MockAdapter {
    pub fn new(id: impl Into<String>, outcomes: Vec<MockOutcome>) -> Self {
        assert!(
            !outcomes.is_empty(),
            "MockAdapter requires at least one outcome"
        );
        Self {
            id: id.into(),
            outcomes,
            cursor: AtomicUsize::new(0),
            dispatches: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// A mock that always returns the same reply text.
    pub fn replying(id: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::new(id, vec![MockOutcome::Reply(reply.into())])
    }

    /// A mock that always fails with the given classification.
    pub fn failing(id: impl Into<String>, kind: TransportErrorKind) -> Self {
        Self::new(id, vec![MockOutcome::Fail(kind)])
    }

    /// Toggle the availability probe result.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// How many times `dispatch` has been called.
    pub fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MockOutcome {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.outcomes.len();
        self.outcomes[idx].clone()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn dispatch(
        &self,
        _client: &Client,
        _prompt: &RenderedPrompt,
        _params: &GenerationParams,
    ) -> std::result::Result<RawReply, TransportError> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        match self.next_outcome() {
            MockOutcome::Reply(text) => Ok(RawReply::from_text(text)),
            MockOutcome::Fail(kind) => Err(TransportError::new(kind, "scripted failure")),
            MockOutcome::Throttled(wait) => Err(TransportError::new(
                TransportErrorKind::RateLimited,
                "scripted throttle",
            )
            .with_retry_after(Some(wait))),
        }
    }

    async fn check_availability(&self, _client: &Client) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
