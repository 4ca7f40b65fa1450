use fdc_core::notify_ipc::{
    HeartbeatPayload, JobProgressPayload, NotifyVersion, PushEnvelope, PushMsg,
};
use fdc_core::{JobRef, SystemCondition, SystemState};
use fdc_sync::{
    run_refresh_loop, run_retry_loop, FetchRequest, RetryLoopConfig, SharedStateView, SyncBus,
    SyncEvent,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;

const TEST_RETRY_DELAY: Duration = Duration::from_millis(40);
const RECV_TIMEOUT: Duration = Duration::from_millis(800);
const QUIET_WINDOW: Duration = Duration::from_millis(150);

struct ViewInner {
    logged_in: bool,
    job: Option<JobRef>,
    condition: SystemCondition,
}

struct TestView {
    inner: RwLock<ViewInner>,
}

impl TestView {
    fn new(logged_in: bool, job: Option<JobRef>, condition: SystemCondition) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(ViewInner {
                logged_in,
                job,
                condition,
            }),
        })
    }

    fn set_job(&self, job: Option<JobRef>, condition: SystemCondition) {
        let mut inner = self.inner.write().expect("view lock");
        inner.job = job;
        inner.condition = condition;
    }
}

impl SharedStateView for TestView {
    fn is_logged_in(&self) -> bool {
        self.inner.read().expect("view lock").logged_in
    }

    fn current_job(&self) -> Option<JobRef> {
        self.inner.read().expect("view lock").job.clone()
    }

    fn system_condition(&self) -> SystemCondition {
        self.inner.read().expect("view lock").condition
    }
}

fn failure() -> SyncEvent {
    SyncEvent::StateFetchFailed {
        reason: "connection reset".to_string(),
    }
}

fn success(job: Option<&str>, condition: SystemCondition) -> SyncEvent {
    SyncEvent::StateFetchSucceeded(SystemState {
        condition,
        active_job: job.map(JobRef::new),
        rtk: None,
        battery_percent: Some(90),
        updated_at: None,
        extra: HashMap::new(),
    })
}

fn push(msg: PushMsg) -> SyncEvent {
    SyncEvent::PushReceived(PushEnvelope {
        version: NotifyVersion::CURRENT,
        device_id: "rover-0413".to_string(),
        timestamp: "2026-05-12T09:30:00Z".to_string(),
        msg,
    })
}

fn job_progress() -> PushMsg {
    PushMsg::JobProgress(JobProgressPayload {
        job_name: "yard-07".to_string(),
        point_count: Some(120_000),
        scan_count: Some(3),
    })
}

/// Blocks until `expected` loops hold event subscriptions, so published
/// events cannot race past a loop that has not started listening yet.
async fn wait_for_subscribers(bus: &SyncBus, expected: usize) {
    timeout(RECV_TIMEOUT, async {
        while bus.subscriber_count() < expected {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("loops subscribed");
}

async fn expect_request(rx: &mut mpsc::Receiver<FetchRequest>) -> FetchRequest {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("request within timeout")
        .expect("request channel open")
}

async fn expect_quiet(rx: &mut mpsc::Receiver<FetchRequest>) {
    let outcome = timeout(QUIET_WINDOW, rx.recv()).await;
    assert!(outcome.is_err(), "unexpected request: {:?}", outcome);
}

#[tokio::test]
async fn failure_while_logged_in_retries_once_after_the_delay() {
    let (bus, mut request_rx) = SyncBus::channel();
    let view = TestView::new(true, None, SystemCondition::Idle);
    let config = RetryLoopConfig {
        retry_delay: TEST_RETRY_DELAY,
    };
    tokio::spawn(run_retry_loop(config, view, bus.clone()));
    wait_for_subscribers(&bus, 1).await;

    let started = Instant::now();
    bus.publish(failure());

    let request = expect_request(&mut request_rx).await;
    assert_eq!(request, FetchRequest::SystemState);
    assert!(started.elapsed() >= TEST_RETRY_DELAY);
    expect_quiet(&mut request_rx).await;
}

#[tokio::test]
async fn repeated_failures_retry_once_each_with_no_compounding() {
    let (bus, mut request_rx) = SyncBus::channel();
    let view = TestView::new(true, None, SystemCondition::Idle);
    let config = RetryLoopConfig {
        retry_delay: TEST_RETRY_DELAY,
    };
    tokio::spawn(run_retry_loop(config, view, bus.clone()));
    wait_for_subscribers(&bus, 1).await;

    let started = Instant::now();
    for _ in 0..3 {
        bus.publish(failure());
    }

    for _ in 0..3 {
        let request = expect_request(&mut request_rx).await;
        assert_eq!(request, FetchRequest::SystemState);
    }
    // Iterations are sequential: three failures cost three full delays,
    // and the delay itself never grows.
    let elapsed = started.elapsed();
    assert!(elapsed >= TEST_RETRY_DELAY * 3);
    assert!(elapsed < TEST_RETRY_DELAY * 10);
    expect_quiet(&mut request_rx).await;
}

#[tokio::test]
async fn failure_while_logged_out_never_retries() {
    let (bus, mut request_rx) = SyncBus::channel();
    let view = TestView::new(false, None, SystemCondition::Idle);
    let config = RetryLoopConfig {
        retry_delay: TEST_RETRY_DELAY,
    };
    tokio::spawn(run_retry_loop(config, view, bus.clone()));
    wait_for_subscribers(&bus, 1).await;

    bus.publish(failure());
    bus.publish(failure());
    expect_quiet(&mut request_rx).await;
}

#[tokio::test]
async fn success_with_no_active_job_does_not_refresh() {
    let (bus, mut request_rx) = SyncBus::channel();
    let view = TestView::new(true, None, SystemCondition::Recording);
    tokio::spawn(run_refresh_loop(view, bus.clone()));
    wait_for_subscribers(&bus, 1).await;

    bus.publish(success(None, SystemCondition::Recording));
    bus.publish(push(job_progress()));
    expect_quiet(&mut request_rx).await;
}

#[tokio::test]
async fn success_while_recording_refreshes_the_active_job_once() {
    let (bus, mut request_rx) = SyncBus::channel();
    let view = TestView::new(true, Some(JobRef::new("JobA")), SystemCondition::Recording);
    tokio::spawn(run_refresh_loop(view, bus.clone()));
    wait_for_subscribers(&bus, 1).await;

    bus.publish(success(Some("JobA"), SystemCondition::Recording));

    let request = expect_request(&mut request_rx).await;
    assert_eq!(
        request,
        FetchRequest::JobDetail {
            name: "JobA".to_string()
        }
    );
    expect_quiet(&mut request_rx).await;
}

#[tokio::test]
async fn push_notification_refreshes_the_active_job() {
    let (bus, mut request_rx) = SyncBus::channel();
    let view = TestView::new(true, Some(JobRef::new("yard-07")), SystemCondition::Activated);
    tokio::spawn(run_refresh_loop(view, bus.clone()));
    wait_for_subscribers(&bus, 1).await;

    bus.publish(push(job_progress()));

    let request = expect_request(&mut request_rx).await;
    assert_eq!(
        request,
        FetchRequest::JobDetail {
            name: "yard-07".to_string()
        }
    );
}

#[tokio::test]
async fn idle_condition_suppresses_refresh_even_with_a_job() {
    let (bus, mut request_rx) = SyncBus::channel();
    let view = TestView::new(true, Some(JobRef::new("yard-07")), SystemCondition::Idle);
    tokio::spawn(run_refresh_loop(view, bus.clone()));
    wait_for_subscribers(&bus, 1).await;

    bus.publish(success(Some("yard-07"), SystemCondition::Idle));
    bus.publish(push(PushMsg::Heartbeat(HeartbeatPayload {
        uptime_secs: 33,
        sent_at_ms: None,
    })));
    expect_quiet(&mut request_rx).await;
}

#[tokio::test]
async fn retry_then_success_drives_exactly_one_job_refresh() {
    let (bus, mut request_rx) = SyncBus::channel();
    let view = TestView::new(true, None, SystemCondition::Idle);
    let config = RetryLoopConfig {
        retry_delay: TEST_RETRY_DELAY,
    };
    tokio::spawn(run_retry_loop(config, view.clone(), bus.clone()));
    tokio::spawn(run_refresh_loop(view.clone(), bus.clone()));
    wait_for_subscribers(&bus, 2).await;

    // Fetch fails right after login; the poller owns the recovery.
    bus.publish(failure());
    let request = expect_request(&mut request_rx).await;
    assert_eq!(request, FetchRequest::SystemState);

    // The retried fetch lands while J1 is activated.
    view.set_job(Some(JobRef::new("J1")), SystemCondition::Activated);
    bus.publish(success(Some("J1"), SystemCondition::Activated));

    let request = expect_request(&mut request_rx).await;
    assert_eq!(
        request,
        FetchRequest::JobDetail {
            name: "J1".to_string()
        }
    );
    expect_quiet(&mut request_rx).await;
}
