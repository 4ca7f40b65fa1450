use crate::{FetchRequest, SharedStateView, SyncBus, SyncEvent};
use fdc_core::{JobRef, SystemCondition};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Which job, if any, deserves a detail refresh for the given snapshot.
/// A job must be active and the device must be capturing into it.
pub fn refresh_target(job: Option<JobRef>, condition: SystemCondition) -> Option<String> {
    let job = job?;
    if condition.is_capturing() {
        Some(job.name)
    } else {
        None
    }
}

/// Re-fetches the active job's detail whenever the state fetch succeeds or
/// a push notification arrives. Pure reactive filter: no retry, no backoff.
pub async fn run_refresh_loop<V: SharedStateView>(view: Arc<V>, bus: SyncBus) {
    let mut events = bus.subscribe();
    loop {
        match events.recv().await {
            Ok(SyncEvent::StateFetchSucceeded(_)) | Ok(SyncEvent::PushReceived(_)) => {}
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(event = "refresh_loop_lagged", skipped);
                continue;
            }
            Err(RecvError::Closed) => {
                debug!(event = "refresh_loop_events_closed");
                return;
            }
        }

        let Some(name) = refresh_target(view.current_job(), view.system_condition()) else {
            debug!(event = "job_refresh_skipped");
            continue;
        };

        if bus
            .request(FetchRequest::JobDetail { name: name.clone() })
            .await
            .is_err()
        {
            debug!(event = "refresh_loop_requests_closed");
            return;
        }
        debug!(event = "job_refresh_requested", job = %name);
    }
}
