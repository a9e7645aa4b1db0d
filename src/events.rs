//! Progress events from the batch processor.
//!
//! The processor reports through a tokio mpsc channel instead of holding
//! any reference back into caller code: subscribe before processing,
//! receive one event per resolved item plus a terminal event for the run.
//! Events are optional; processing works with nobody listening.

use tokio::sync::mpsc;

use crate::content::AnalysisResult;

/// Counts carried by every event: the denominators a progress bar needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Items resolved so far (succeeded plus terminally failed).
    pub processed: usize,
    /// Items still pending or awaiting retry.
    pub remaining: usize,
    /// Items that failed terminally.
    pub failed: usize,
}

/// Events emitted while the queue is processed.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// An item resolved successfully.
    ItemSucceeded {
        /// Content item id.
        item_id: String,
        /// The normalized result.
        result: AnalysisResult,
        /// Counts after this item resolved.
        progress: Progress,
    },
    /// An item failed terminally (exhausted the chain past max attempts).
    ItemFailed {
        /// Content item id.
        item_id: String,
        /// The last recorded error.
        error: String,
        /// Counts after this item resolved.
        progress: Progress,
    },
    /// Every enqueued item has resolved.
    Completed { progress: Progress },
    /// Cancellation was requested; the in-flight batch finished, the rest
    /// of the queue was left pending.
    Cancelled { progress: Progress },
}

impl QueueEvent {
    pub fn progress(&self) -> Progress {
        match self {
            QueueEvent::ItemSucceeded { progress, .. }
            | QueueEvent::ItemFailed { progress, .. }
            | QueueEvent::Completed { progress }
            | QueueEvent::Cancelled { progress } => *progress,
        }
    }
}

/// Send an event if anyone subscribed. A dropped receiver is not an
/// error; the queue keeps processing.
pub(crate) fn emit(sender: &Option<mpsc::UnboundedSender<QueueEvent>>, event: QueueEvent) {
    if let Some(tx) = sender {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        emit(
            &Some(tx),
            QueueEvent::Completed {
                progress: Progress {
                    processed: 1,
                    remaining: 0,
                    failed: 0,
                },
            },
        );
    }

    #[test]
    fn progress_accessor_covers_all_variants() {
        let p = Progress {
            processed: 2,
            remaining: 3,
            failed: 1,
        };
        let event = QueueEvent::ItemFailed {
            item_id: "id".into(),
            error: "boom".into(),
            progress: p,
        };
        assert_eq!(event.progress(), p);
    }
}
