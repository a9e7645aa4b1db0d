//! Analysis queue and batch processor.
//!
//! Items are enqueued without blocking, then [`process_queue`]
//! (BatchProcessor::process_queue) drains them: up to `batch_size` items
//! dispatch concurrently through the gateway, and the processor awaits
//! the whole batch before pulling the next one, so batches are strictly
//! serialized while peak concurrency stays bounded. Items that exhaust
//! the provider chain are rescheduled with exponential backoff until
//! `max_attempts`, then marked failed terminally. One bad item never
//! halts the rest of the queue.
//!
//! The item list is owned by this single control loop; the dispatches it
//! issues run concurrently but never touch queue state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backoff::BackoffConfig;
use crate::clock::Clock;
use crate::content::{AnalysisRequest, AnalysisResult, ContentItem, GenerationParams};
use crate::error::{OrchestratorError, Result};
use crate::events::{emit, Progress, QueueEvent};
use crate::gateway::Gateway;
use crate::template::{render, RenderedPrompt, TemplateCatalog};

/// Lifecycle of a queue item. Transitions happen only inside the
/// processor's control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

/// Per-enqueue options: which template to render and any extra context
/// slots for it.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Template used to render every item in this call.
    pub template_id: String,
    /// Caller-supplied context slots, merged over item attributes.
    pub context: HashMap<String, String>,
    /// Generation parameter override; the template's defaults otherwise.
    pub params: Option<GenerationParams>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            template_id: "general".into(),
            context: HashMap::new(),
            params: None,
        }
    }
}

impl EnqueueOptions {
    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = template_id.into();
        self
    }

    pub fn with_context(mut self, context: HashMap<String, String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = Some(params);
        self
    }
}

struct QueueItem {
    request: AnalysisRequest,
    prompt: RenderedPrompt,
    status: QueueStatus,
    attempts: u32,
    eligible_at: u64,
    last_error: Option<String>,
    result: Option<AnalysisResult>,
}

/// Drains the analysis queue through a gateway, in serialized batches.
pub struct BatchProcessor {
    gateway: Arc<Gateway>,
    catalog: Arc<RwLock<TemplateCatalog>>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    backoff: BackoffConfig,
    items: Vec<QueueItem>,
    cancelled: Arc<AtomicBool>,
    events: Option<mpsc::UnboundedSender<QueueEvent>>,
}

impl BatchProcessor {
    pub fn new(
        gateway: Arc<Gateway>,
        catalog: Arc<RwLock<TemplateCatalog>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            catalog,
            clock,
            batch_size: 3,
            backoff: BackoffConfig::standard(),
            items: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            events: None,
        }
    }

    /// Items dispatched concurrently per batch. Minimum 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Retry policy for items that exhaust the provider chain.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Open the progress channel. One event per resolved item, plus a
    /// terminal `Completed` or `Cancelled`.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<QueueEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Shared flag for requesting cancellation from another task. Setting
    /// it prevents new batches from starting; the in-flight batch always
    /// finishes.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Append items in `pending` state. Renders each prompt up front, so
    /// template and slot errors surface here, synchronously, before any
    /// dispatch. Returns the number of items enqueued.
    pub fn enqueue(&mut self, items: Vec<ContentItem>, options: EnqueueOptions) -> Result<usize> {
        let catalog = read_catalog(&self.catalog);
        let template = catalog.get(&options.template_id)?;
        let params = options.params.clone().unwrap_or_else(|| template.params.clone());

        let mut queued = Vec::with_capacity(items.len());
        for item in items {
            let prompt = render(template, &item, &options.context)?;
            queued.push(QueueItem {
                request: AnalysisRequest {
                    item,
                    template_id: options.template_id.clone(),
                    params: params.clone(),
                    enqueued_at: Utc::now(),
                },
                prompt,
                status: QueueStatus::Pending,
                attempts: 0,
                eligible_at: 0,
                last_error: None,
                result: None,
            });
        }
        drop(catalog);

        let count = queued.len();
        self.items.extend(queued);
        debug!(count, "items enqueued");
        Ok(count)
    }

    /// Drain the queue. Returns the final progress counts; also emitted as
    /// the terminal event on the progress channel.
    pub async fn process_queue(&mut self) -> Result<Progress> {
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                let progress = self.progress();
                info!(?progress, "queue cancelled before next batch");
                emit(&self.events, QueueEvent::Cancelled { progress });
                return Ok(progress);
            }

            let now = self.clock.now_millis();
            let batch = self.next_batch(now);
            if batch.is_empty() {
                match self.earliest_eligible() {
                    // Everything pending is backing off; wait it out.
                    Some(wake) if wake > now => {
                        tokio::time::sleep(Duration::from_millis(wake - now)).await;
                        continue;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }

            self.run_batch(batch).await;
        }

        let progress = self.progress();
        info!(?progress, "queue completed");
        emit(&self.events, QueueEvent::Completed { progress });
        Ok(progress)
    }

    /// Indices of up to `batch_size` eligible pending items, in enqueue
    /// order (FIFO at batch granularity).
    fn next_batch(&self, now: u64) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == QueueStatus::Pending && item.eligible_at <= now)
            .map(|(idx, _)| idx)
            .take(self.batch_size)
            .collect()
    }

    fn earliest_eligible(&self) -> Option<u64> {
        self.items
            .iter()
            .filter(|item| item.status == QueueStatus::Pending)
            .map(|item| item.eligible_at)
            .min()
    }

    async fn run_batch(&mut self, batch: Vec<usize>) {
        for &idx in &batch {
            self.items[idx].status = QueueStatus::InFlight;
        }

        let dispatches = batch.iter().map(|&idx| {
            let gateway = Arc::clone(&self.gateway);
            let prompt = self.items[idx].prompt.clone();
            let params = self.items[idx].request.params.clone();
            async move { (idx, gateway.analyze(&prompt, &params).await) }
        });
        let outcomes = join_all(dispatches).await;

        for (idx, outcome) in outcomes {
            self.resolve(idx, outcome);
        }
    }

    fn resolve(&mut self, idx: usize, outcome: Result<AnalysisResult>) {
        let max_attempts = self.backoff.max_attempts;
        let now = self.clock.now_millis();
        let item = &mut self.items[idx];
        item.attempts += 1;

        match outcome {
            Ok(result) => {
                item.status = QueueStatus::Succeeded;
                item.last_error = None;
                let item_id = item.request.item.id.clone();
                item.result = Some(result.clone());
                let progress = self.progress();
                emit(
                    &self.events,
                    QueueEvent::ItemSucceeded {
                        item_id,
                        result,
                        progress,
                    },
                );
            }
            Err(err) => {
                let message = err.to_string();
                if item.attempts < max_attempts {
                    // The largest Retry-After hint collected across the chain
                    // floors the backoff delay.
                    let hint = match &err {
                        OrchestratorError::Exhausted { failures } => {
                            failures.iter().filter_map(|f| f.retry_after).max()
                        }
                        _ => None,
                    };
                    item.status = QueueStatus::Pending;
                    item.eligible_at = self.backoff.eligible_at_with_hint(now, item.attempts, hint);
                    item.last_error = Some(message.clone());
                    debug!(
                        item = %item.request.item.id,
                        attempts = item.attempts,
                        eligible_at = item.eligible_at,
                        "item rescheduled after exhaustion"
                    );
                } else {
                    item.status = QueueStatus::Failed;
                    item.last_error = Some(message.clone());
                    warn!(item = %item.request.item.id, error = %message, "item failed terminally");
                    let progress = self.progress();
                    emit(
                        &self.events,
                        QueueEvent::ItemFailed {
                            item_id: self.items[idx].request.item.id.clone(),
                            error: message,
                            progress,
                        },
                    );
                }
            }
        }
    }

    /// Current counts of {processed, remaining, failed}.
    pub fn progress(&self) -> Progress {
        let mut processed = 0;
        let mut remaining = 0;
        let mut failed = 0;
        for item in &self.items {
            match item.status {
                QueueStatus::Succeeded => processed += 1,
                QueueStatus::Failed => {
                    processed += 1;
                    failed += 1;
                }
                QueueStatus::Pending | QueueStatus::InFlight => remaining += 1,
            }
        }
        Progress {
            processed,
            remaining,
            failed,
        }
    }

    /// Successful results so far, paired with their item ids, in enqueue
    /// order.
    pub fn results(&self) -> Vec<(&str, &AnalysisResult)> {
        self.items
            .iter()
            .filter_map(|item| {
                item.result
                    .as_ref()
                    .map(|r| (item.request.item.id.as_str(), r))
            })
            .collect()
    }

    /// Terminal failures so far: item id and last recorded error.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.items
            .iter()
            .filter(|item| item.status == QueueStatus::Failed)
            .filter_map(|item| {
                item.last_error
                    .as_deref()
                    .map(|e| (item.request.item.id.as_str(), e))
            })
            .collect()
    }
}

fn read_catalog(catalog: &RwLock<TemplateCatalog>) -> RwLockReadGuard<'_, TemplateCatalog> {
    catalog.read().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::backoff::JitterStrategy;
    use crate::error::{OrchestratorError, ProviderFailure};
    use crate::provider::{
        MockAdapter, MockOutcome, ProviderAdapter, ProviderConfig, SharedAdapter,
        TransportErrorKind,
    };

    fn items(n: usize) -> Vec<ContentItem> {
        (0..n)
            .map(|i| ContentItem::new(format!("item-{i}"), format!("file-{i}.md"), "text body"))
            .collect()
    }

    fn processor_with(adapter: Arc<MockAdapter>) -> BatchProcessor {
        let config = ProviderConfig::new(adapter.id(), "http://unused")
            .with_default_model("test-model")
            .with_rate_limit(1000)
            .with_max_concurrent(16);
        let clock = Arc::new(ManualClock::new(0));
        let gateway = Gateway::new(
            vec![config],
            vec![adapter as SharedAdapter],
            clock.clone(),
        )
        .unwrap();
        BatchProcessor::new(
            Arc::new(gateway),
            Arc::new(RwLock::new(TemplateCatalog::new())),
            clock,
        )
    }

    fn zero_delay_backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            max_attempts,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: JitterStrategy::None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn five_items_one_attempt_each_all_fail() {
        let mock = Arc::new(MockAdapter::failing("p1", TransportErrorKind::Unreachable));
        let mut processor = processor_with(mock.clone())
            .with_batch_size(2)
            .with_backoff(BackoffConfig::none());
        let mut rx = processor.subscribe();

        processor.enqueue(items(5), EnqueueOptions::default()).unwrap();
        let progress = processor.process_queue().await.unwrap();

        assert_eq!(progress, Progress { processed: 5, remaining: 0, failed: 5 });
        // No item attempted more than once.
        assert_eq!(mock.dispatch_count(), 5);

        let events = drain(&mut rx);
        let failed = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::ItemFailed { .. }))
            .count();
        let succeeded = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::ItemSucceeded { .. }))
            .count();
        assert_eq!(failed, 5);
        assert_eq!(succeeded, 0);
        assert!(matches!(events.last(), Some(QueueEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn structured_success_clamps_relevance_and_tags_provider() {
        let mock = Arc::new(MockAdapter::replying(
            "p1",
            r#"{"summary": "all good", "insights": ["a"], "categories": ["x"], "relevance": 1.7}"#,
        ));
        let mut processor = processor_with(mock).with_backoff(BackoffConfig::none());

        processor.enqueue(items(1), EnqueueOptions::default()).unwrap();
        let progress = processor.process_queue().await.unwrap();

        assert_eq!(progress, Progress { processed: 1, remaining: 0, failed: 0 });
        let results = processor.results();
        assert_eq!(results.len(), 1);
        let (id, result) = results[0];
        assert_eq!(id, "item-0");
        assert_eq!(result.relevance, 1.0);
        assert_eq!(result.provider, "p1");
        assert_eq!(result.summary, "all good");
    }

    #[tokio::test]
    async fn exhausted_item_retries_until_success() {
        let mock = Arc::new(MockAdapter::new(
            "p1",
            vec![
                MockOutcome::Fail(TransportErrorKind::Unreachable),
                MockOutcome::Reply(r#"{"summary": "second try"}"#.into()),
            ],
        ));
        let mut processor = processor_with(mock.clone()).with_backoff(zero_delay_backoff(2));

        processor.enqueue(items(1), EnqueueOptions::default()).unwrap();
        let progress = processor.process_queue().await.unwrap();

        assert_eq!(progress, Progress { processed: 1, remaining: 0, failed: 0 });
        assert_eq!(mock.dispatch_count(), 2);
        assert_eq!(processor.results()[0].1.summary, "second try");
    }

    #[test]
    fn retry_schedule_honors_provider_wait_hint() {
        let mock = Arc::new(MockAdapter::replying("p1", "unused"));
        let mut processor = processor_with(mock).with_backoff(zero_delay_backoff(2));
        processor.enqueue(items(1), EnqueueOptions::default()).unwrap();

        let err = OrchestratorError::Exhausted {
            failures: vec![ProviderFailure {
                provider: "p1".into(),
                reason: "rate-limited".into(),
                retry_after: Some(Duration::from_secs(30)),
            }],
        };
        processor.resolve(0, Err(err));

        // Zero backoff delay, 30s hint, clock at 0: eligible at 30s.
        assert_eq!(processor.items[0].status, QueueStatus::Pending);
        assert_eq!(processor.items[0].eligible_at, 30_000);
    }

    #[tokio::test]
    async fn retries_stop_at_max_attempts() {
        let mock = Arc::new(MockAdapter::failing("p1", TransportErrorKind::Timeout));
        let mut processor = processor_with(mock.clone()).with_backoff(zero_delay_backoff(3));

        processor.enqueue(items(1), EnqueueOptions::default()).unwrap();
        let progress = processor.process_queue().await.unwrap();

        assert_eq!(progress.failed, 1);
        assert_eq!(mock.dispatch_count(), 3);
        let failures = processor.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.contains("timeout"));
    }

    #[tokio::test]
    async fn batches_resolve_in_enqueue_order() {
        let mock = Arc::new(MockAdapter::replying("p1", r#"{"summary": "ok"}"#));
        let mut processor = processor_with(mock)
            .with_batch_size(1)
            .with_backoff(BackoffConfig::none());
        let mut rx = processor.subscribe();

        processor.enqueue(items(3), EnqueueOptions::default()).unwrap();
        processor.process_queue().await.unwrap();

        let resolved: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                QueueEvent::ItemSucceeded { item_id, .. } => Some(item_id),
                _ => None,
            })
            .collect();
        assert_eq!(resolved, vec!["item-0", "item-1", "item-2"]);
    }

    #[tokio::test]
    async fn cancellation_leaves_pending_items_untouched() {
        let mock = Arc::new(MockAdapter::replying("p1", r#"{"summary": "ok"}"#));
        let mut processor = processor_with(mock.clone()).with_backoff(BackoffConfig::none());
        let mut rx = processor.subscribe();

        processor.enqueue(items(4), EnqueueOptions::default()).unwrap();
        processor.cancel_handle().store(true, Ordering::SeqCst);
        let progress = processor.process_queue().await.unwrap();

        assert_eq!(progress, Progress { processed: 0, remaining: 4, failed: 0 });
        assert_eq!(mock.dispatch_count(), 0);
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(QueueEvent::Cancelled { .. })));
    }

    #[tokio::test]
    async fn progress_events_carry_running_counts() {
        let mock = Arc::new(MockAdapter::replying("p1", r#"{"summary": "ok"}"#));
        let mut processor = processor_with(mock)
            .with_batch_size(1)
            .with_backoff(BackoffConfig::none());
        let mut rx = processor.subscribe();

        processor.enqueue(items(2), EnqueueOptions::default()).unwrap();
        processor.process_queue().await.unwrap();

        let counts: Vec<Progress> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, QueueEvent::ItemSucceeded { .. }))
            .map(|e| e.progress())
            .collect();
        assert_eq!(counts[0], Progress { processed: 1, remaining: 1, failed: 0 });
        assert_eq!(counts[1], Progress { processed: 2, remaining: 0, failed: 0 });
    }

    #[test]
    fn enqueue_fails_fast_on_unknown_template() {
        let mock = Arc::new(MockAdapter::replying("p1", "x"));
        let mut processor = processor_with(mock);
        let err = processor
            .enqueue(items(1), EnqueueOptions::default().with_template("ghost"))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTemplate(_)));
        assert_eq!(processor.progress().remaining, 0);
    }

    #[test]
    fn enqueue_fails_fast_on_unresolved_slot() {
        let mock = Arc::new(MockAdapter::replying("p1", "x"));
        let mut processor = processor_with(mock);
        {
            let catalog = processor.catalog.clone();
            let mut catalog = catalog.write().unwrap();
            let template = crate::template::PromptTemplate::new(
                "needs-audience",
                "Needs audience",
                "Explain {content} to {audience}",
            )
            .with_slots(&["content", "audience"]);
            catalog.create(template).unwrap();
        }
        let err = processor
            .enqueue(
                items(1),
                EnqueueOptions::default().with_template("needs-audience"),
            )
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnresolvedSlot { .. }));
    }
}
