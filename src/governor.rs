//! Per-provider rate and concurrency admission control.
//!
//! The [`Governor`] decides whether a request may be dispatched *now*:
//! a fixed 60-second window counter (wall-clock aligned) caps requests
//! per minute, and an in-flight counter caps concurrency. Admission hands
//! out a [`Lease`] that returns its concurrency slot exactly once, on
//! `Drop`, so every exit path — success, transport error, panic unwind —
//! releases.
//!
//! This is the only synchronization point in the subsystem: all shared
//! mutable state lives behind its single mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use crate::provider::ProviderConfig;

const WINDOW_MILLIS: u64 = 60_000;

/// Why admission was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denied {
    /// The per-minute budget for this window is spent. Wait `retry_after`
    /// (the remaining time to the window boundary) before asking again.
    RateLimited { retry_after: Duration },
    /// Every concurrency slot is occupied. Capacity frees as soon as any
    /// in-flight call finishes, so requeue immediately rather than wait
    /// for a timer.
    AtCapacity,
}

impl Denied {
    /// Short label for failure records and logs.
    pub fn reason(&self) -> String {
        match self {
            Denied::RateLimited { retry_after } => {
                format!("rate limit window exhausted (retry in {:?})", retry_after)
            }
            Denied::AtCapacity => "concurrency cap reached".to_string(),
        }
    }
}

/// Outcome of an admission request.
#[derive(Debug)]
pub enum Admission {
    Granted(Lease),
    Denied(Denied),
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    requests_per_minute: u32,
    max_concurrent: u32,
}

/// Per-provider mutable counters. Stale windows are reset in place rather
/// than accumulated, so an idle provider leaks nothing.
#[derive(Debug, Default)]
struct RateState {
    window_start: u64,
    issued_in_window: u32,
    in_flight: u32,
}

type SharedStates = Arc<Mutex<HashMap<String, RateState>>>;

/// Admission controller shared by every dispatch through the gateway.
pub struct Governor {
    clock: Arc<dyn Clock>,
    limits: HashMap<String, Limits>,
    states: SharedStates,
}

impl Governor {
    pub fn new(configs: &[ProviderConfig], clock: Arc<dyn Clock>) -> Self {
        let limits = configs
            .iter()
            .map(|c| {
                (
                    c.id.clone(),
                    Limits {
                        requests_per_minute: c.requests_per_minute,
                        max_concurrent: c.max_concurrent,
                    },
                )
            })
            .collect();
        Self {
            clock,
            limits,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ask for permission to dispatch one request to `provider_id` now.
    ///
    /// The rate window is checked before the concurrency cap, so a caller
    /// denied `AtCapacity` knows the window still has budget.
    pub fn try_acquire(&self, provider_id: &str) -> Result<Admission> {
        let limits = self
            .limits
            .get(provider_id)
            .copied()
            .ok_or_else(|| OrchestratorError::UnknownProvider(provider_id.to_string()))?;

        let now = self.clock.now_millis();
        let window_start = now - now % WINDOW_MILLIS;

        let mut states = lock_states(&self.states);
        let state = states.entry(provider_id.to_string()).or_default();

        if state.window_start != window_start {
            state.window_start = window_start;
            state.issued_in_window = 0;
        }

        if state.issued_in_window >= limits.requests_per_minute {
            let retry_after = Duration::from_millis(window_start + WINDOW_MILLIS - now);
            debug!(provider = provider_id, ?retry_after, "admission denied: rate window spent");
            return Ok(Admission::Denied(Denied::RateLimited { retry_after }));
        }

        if state.in_flight >= limits.max_concurrent {
            debug!(provider = provider_id, in_flight = state.in_flight, "admission denied: at capacity");
            return Ok(Admission::Denied(Denied::AtCapacity));
        }

        state.issued_in_window += 1;
        state.in_flight += 1;

        Ok(Admission::Granted(Lease {
            provider: provider_id.to_string(),
            states: Arc::clone(&self.states),
        }))
    }

    /// Current in-flight count for a provider (diagnostics).
    pub fn in_flight(&self, provider_id: &str) -> u32 {
        lock_states(&self.states)
            .get(provider_id)
            .map(|s| s.in_flight)
            .unwrap_or(0)
    }
}

/// A poisoned mutex here only means a panic mid-update of plain counters;
/// the counters themselves stay coherent, so recover the guard.
fn lock_states(states: &SharedStates) -> MutexGuard<'_, HashMap<String, RateState>> {
    states.lock().unwrap_or_else(|e| e.into_inner())
}

/// Permission to dispatch one request. Dropping the lease frees the
/// concurrency slot; the window counter is not refunded.
#[derive(Debug)]
pub struct Lease {
    provider: String,
    states: SharedStates,
}

impl Lease {
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut states = lock_states(&self.states);
        if let Some(state) = states.get_mut(&self.provider) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }
}
