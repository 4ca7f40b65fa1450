//! Keeps the console's picture of the device fresh: a retry loop for the
//! system-state fetch and a refresh loop for the active job's detail. Both
//! are long-lived reactive tasks fed by a broadcast event bus; the actual
//! network I/O lives with whoever consumes the emitted fetch requests.

use fdc_core::notify_ipc::PushEnvelope;
use fdc_core::{JobRef, SystemCondition, SystemState};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

pub mod refresh_runtime;
pub mod retry_runtime;

pub use refresh_runtime::{refresh_target, run_refresh_loop};
pub use retry_runtime::{retry_decision, run_retry_loop, RetryDecision, RetryLoopConfig};

pub const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Outcome and push events the loops react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateFetchFailed { reason: String },
    StateFetchSucceeded(SystemState),
    PushReceived(PushEnvelope),
}

/// Fetch work the loops emit for the dispatcher to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    SystemState,
    JobDetail { name: String },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch request channel closed")]
    RequestChannelClosed,
}

/// Read-only view of the shared session/device state. The loops never
/// write through this; mutation belongs to the dispatcher and the auth
/// collaborator.
pub trait SharedStateView: Send + Sync + 'static {
    fn is_logged_in(&self) -> bool;
    fn current_job(&self) -> Option<JobRef>;
    fn system_condition(&self) -> SystemCondition;
}

/// Event/request plumbing shared by the loops and the dispatcher. Events
/// fan out over a broadcast channel so each loop owns an independent
/// subscription; requests funnel into one queue.
#[derive(Clone)]
pub struct SyncBus {
    events: broadcast::Sender<SyncEvent>,
    requests: mpsc::Sender<FetchRequest>,
}

impl SyncBus {
    pub fn new(requests: mpsc::Sender<FetchRequest>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { events, requests }
    }

    /// Builds a bus plus the receiving end of its request queue.
    pub fn channel() -> (Self, mpsc::Receiver<FetchRequest>) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        (Self::new(request_tx), request_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Number of live event subscriptions. Events published before a loop
    /// has subscribed are never delivered to it, so callers that need a
    /// loop to be listening can poll this after spawning it.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Publishing with no live subscribers is not an error.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub async fn request(&self, request: FetchRequest) -> Result<(), SyncError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| SyncError::RequestChannelClosed)
    }
}
