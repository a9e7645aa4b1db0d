//! # Analysis Orchestrator
//!
//! LLM analysis orchestration: provider adapters, rate/concurrency
//! governance, prompt templating, response normalization, priority-chain
//! failover, and batched queue processing.
//!
//! This crate sits between a content source and interchangeable inference
//! providers. Callers enqueue content items; the batch processor renders
//! each item through a prompt template, dispatches through the provider
//! gateway (which walks the failover chain under the governor's rate and
//! concurrency limits), normalizes whatever comes back into one canonical
//! [`AnalysisResult`], and streams progress events.
//!
//! ## Core Concepts
//!
//! - **[`ProviderAdapter`]** — object-safe trait, one per provider; knows
//!   only its own wire format, auth, timeout, and error classification.
//! - **[`Governor`]** — per-provider fixed-window rate limit plus
//!   concurrency cap; admission hands out an RAII [`Lease`].
//! - **[`TemplateCatalog`]** / [`render`] / [`adapt_for_provider`] —
//!   template CRUD, slot substitution, per-provider output-format
//!   adaptation.
//! - **[`normalize()`]** — three-tier, never-failing conversion of any raw
//!   reply into an [`AnalysisResult`].
//! - **[`Gateway`]** — priority-chain failover; [`Exhausted`] carries the
//!   ordered per-provider failure list.
//! - **[`BatchProcessor`]** — serialized concurrent batches, retry with
//!   exponential backoff, cancellation, mpsc progress events.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::{Arc, RwLock};
//! use analysis_orchestrator::{
//!     BatchProcessor, ContentItem, EnqueueOptions, Gateway, OllamaAdapter,
//!     ProviderConfig, SharedAdapter, SystemClock, TemplateCatalog,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProviderConfig::new("ollama", "http://localhost:11434")
//!         .with_default_model("llama3.2")
//!         .with_rate_limit(30)
//!         .with_max_concurrent(2);
//!     let adapter: SharedAdapter =
//!         Arc::new(OllamaAdapter::new("http://localhost:11434", "llama3.2"));
//!     let clock = Arc::new(SystemClock);
//!
//!     let gateway = Arc::new(Gateway::new(vec![config], vec![adapter], clock.clone())?);
//!     let catalog = Arc::new(RwLock::new(TemplateCatalog::new()));
//!     let mut processor = BatchProcessor::new(gateway, catalog, clock).with_batch_size(2);
//!
//!     let mut events = processor.subscribe();
//!     processor.enqueue(
//!         vec![ContentItem::new("1", "notes.md", "meeting notes...")],
//!         EnqueueOptions::default(),
//!     )?;
//!     processor.process_queue().await?;
//!
//!     while let Ok(event) = events.try_recv() {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`Exhausted`]: OrchestratorError::Exhausted

pub mod backoff;
pub mod clock;
pub mod content;
pub mod error;
pub mod events;
pub mod gateway;
pub mod governor;
pub mod normalize;
pub mod provider;
pub mod queue;
pub mod store;
pub mod template;

pub use backoff::{BackoffConfig, JitterStrategy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use content::{AnalysisRequest, AnalysisResult, ContentItem, GenerationParams};
pub use error::{OrchestratorError, ProviderFailure, Result};
pub use events::{Progress, QueueEvent};
pub use gateway::Gateway;
pub use governor::{Admission, Denied, Governor, Lease};
pub use normalize::normalize;
pub use provider::{
    AnthropicAdapter, MockAdapter, MockOutcome, OllamaAdapter, OpenAiAdapter, ProviderAdapter,
    ProviderConfig, RawReply, SharedAdapter, TransportError, TransportErrorKind,
};
pub use queue::{BatchProcessor, EnqueueOptions, QueueStatus};
pub use store::{KvStore, MemoryStore, ProviderCredentials};
pub use template::{
    adapt_for_provider, render, OutputFormat, PromptTemplate, RenderedPrompt, TemplateCatalog,
    ValidationResult,
};
