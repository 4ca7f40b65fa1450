use crate::{FetchRequest, SharedStateView, SyncBus, SyncEvent, DEFAULT_RETRY_DELAY_MS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLoopConfig {
    pub retry_delay: Duration,
}

impl Default for RetryLoopConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// What a single failure event turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Suppress,
}

/// The session gate is the only circuit breaker: the delay never grows and
/// there is no attempt cap.
pub fn retry_decision(config: &RetryLoopConfig, logged_in: bool) -> RetryDecision {
    if logged_in {
        RetryDecision::RetryAfter(config.retry_delay)
    } else {
        RetryDecision::Suppress
    }
}

/// Re-issues the system-state fetch after every failure, one retry per
/// failure event, for as long as a session is authenticated. Runs until
/// the bus is torn down at process exit.
pub async fn run_retry_loop<V: SharedStateView>(config: RetryLoopConfig, view: Arc<V>, bus: SyncBus) {
    let mut events = bus.subscribe();
    loop {
        match events.recv().await {
            Ok(SyncEvent::StateFetchFailed { reason }) => {
                debug!(event = "state_fetch_failed", reason = %reason);
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(event = "retry_loop_lagged", skipped);
                continue;
            }
            Err(RecvError::Closed) => {
                debug!(event = "retry_loop_events_closed");
                return;
            }
        }

        match retry_decision(&config, view.is_logged_in()) {
            RetryDecision::Suppress => {
                debug!(event = "state_fetch_retry_suppressed");
            }
            RetryDecision::RetryAfter(delay) => {
                tokio::time::sleep(delay).await;
                if bus.request(FetchRequest::SystemState).await.is_err() {
                    debug!(event = "retry_loop_requests_closed");
                    return;
                }
                info!(event = "state_fetch_retry", delay_ms = delay.as_millis() as u64);
            }
        }
    }
}
