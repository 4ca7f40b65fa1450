use fdc_core::{JobDetail, JobRef, SessionState, SystemCondition, SystemState};
use fdc_sync::SharedStateView;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// The daemon's shared picture of the session and device. Written by the
/// dispatcher, the auth flow, and the notify socket; the sync loops only
/// read it through `SharedStateView`.
pub struct SharedState {
    inner: RwLock<SharedInner>,
}

#[derive(Default)]
struct SharedInner {
    session: SessionState,
    condition: SystemCondition,
    active_job: Option<JobRef>,
    last_job_detail: Option<JobDetail>,
    last_notify_at: Option<Instant>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SharedInner::default()),
        }
    }

    pub fn set_authenticating(&self, authenticating: bool) {
        let mut inner = self.inner.write().expect("state lock");
        inner.session.is_authenticating = authenticating;
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        let mut inner = self.inner.write().expect("state lock");
        inner.session.is_logged_in = logged_in;
        inner.session.is_authenticating = false;
    }

    pub fn apply_system_state(&self, state: &SystemState) {
        let mut inner = self.inner.write().expect("state lock");
        inner.condition = state.condition;
        inner.active_job = state.active_job.clone();
    }

    pub fn apply_job_detail(&self, detail: JobDetail) {
        let mut inner = self.inner.write().expect("state lock");
        inner.last_job_detail = Some(detail);
    }

    pub fn touch_notify(&self) {
        let mut inner = self.inner.write().expect("state lock");
        inner.last_notify_at = Some(Instant::now());
    }

    pub fn session(&self) -> SessionState {
        self.inner.read().expect("state lock").session
    }

    pub fn last_job_detail(&self) -> Option<JobDetail> {
        self.inner.read().expect("state lock").last_job_detail.clone()
    }

    pub fn last_notify_age(&self) -> Option<Duration> {
        self.inner
            .read()
            .expect("state lock")
            .last_notify_at
            .map(|at| at.elapsed())
    }
}

impl SharedStateView for SharedState {
    fn is_logged_in(&self) -> bool {
        self.inner.read().expect("state lock").session.is_logged_in
    }

    fn current_job(&self) -> Option<JobRef> {
        self.inner.read().expect("state lock").active_job.clone()
    }

    fn system_condition(&self) -> SystemCondition {
        self.inner.read().expect("state lock").condition
    }
}
