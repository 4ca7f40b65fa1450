use crate::state::SharedState;
use fdc_device_api::{DeviceApiError, DeviceClient};
use fdc_sync::{FetchRequest, SyncBus, SyncEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Executes fetch requests one at a time against the device API and turns
/// outcomes into bus events. Only the system-state fetch has retry
/// semantics (owned by the retry loop); job-detail failures are logged
/// and dropped.
pub async fn run_dispatcher(
    api: DeviceClient,
    shared: Arc<SharedState>,
    bus: SyncBus,
    mut requests: mpsc::Receiver<FetchRequest>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            FetchRequest::SystemState => match api.system_state().await {
                Ok(state) => {
                    shared.apply_system_state(&state);
                    info!(event = "system_state_fetched", condition = %state.condition);
                    bus.publish(SyncEvent::StateFetchSucceeded(state));
                }
                Err(err) => {
                    note_unauthorized(&err, &shared);
                    warn!(event = "system_state_fetch_error", error = %err);
                    bus.publish(SyncEvent::StateFetchFailed {
                        reason: err.to_string(),
                    });
                }
            },
            FetchRequest::JobDetail { name } => match api.job_detail(&name).await {
                Ok(detail) => {
                    info!(event = "job_detail_fetched", job = %detail.name);
                    shared.apply_job_detail(detail);
                }
                Err(err) => {
                    note_unauthorized(&err, &shared);
                    warn!(event = "job_detail_fetch_error", job = %name, error = %err);
                }
            },
        }
    }
    debug!(event = "dispatcher_requests_closed");
}

fn note_unauthorized(err: &DeviceApiError, shared: &SharedState) {
    if err.is_unauthorized() {
        shared.set_logged_in(false);
        warn!(event = "session_expired");
    }
}
