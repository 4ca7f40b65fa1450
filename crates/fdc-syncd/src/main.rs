use clap::Parser;
use fdc_device_api::DeviceClient;
use fdc_sync::{
    run_refresh_loop, run_retry_loop, FetchRequest, RetryLoopConfig, SharedStateView, SyncBus,
    DEFAULT_RETRY_DELAY_MS,
};
use std::{
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};
use url::Url;

mod dispatcher;
mod notify_socket;
mod state;

use dispatcher::run_dispatcher;
use notify_socket::{run_notify_socket, NotifySocketConfig};
use state::SharedState;

const STATUS_INTERVAL_SECS: u64 = 30;
const NOTIFY_STALE_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(name = "fdc-syncd")]
struct Args {
    #[arg(long, default_value = "")]
    base_url: String,
    #[arg(long, default_value = "")]
    notify_url: String,
    #[arg(long, default_value = "")]
    operator: String,
    #[arg(long, default_value = "")]
    pin: String,
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_MS)]
    retry_delay_ms: u64,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[derive(Clone, Debug)]
struct Config {
    base_url: String,
    notify_url: String,
    operator: String,
    pin: String,
    retry_delay: Duration,
    log_dir: String,
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(args);
    let _log_guard = init_logging(&config);

    let notify_url: Url = match config.notify_url.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_notify_url", error = %err, url = %config.notify_url);
            return;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    let shared = Arc::new(SharedState::new());
    let mut api = DeviceClient::new(&config.base_url);

    if !login_with_retry(&mut api, &config, &shared, shutdown_rx.clone()).await {
        info!(event = "syncd_stop", reason = "shutdown_before_login");
        return;
    }

    let (bus, request_rx) = SyncBus::channel();

    let socket_config = NotifySocketConfig {
        notify_url: notify_url.clone(),
        client_id: format!("console-{}", uuid::Uuid::new_v4()),
        max_frame_bytes: fdc_core::notify_ipc::DEFAULT_MAX_FRAME_BYTES,
    };
    tokio::spawn(run_notify_socket(
        socket_config,
        shared.clone(),
        bus.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(run_dispatcher(
        api.clone(),
        shared.clone(),
        bus.clone(),
        request_rx,
    ));
    tokio::spawn(run_retry_loop(
        RetryLoopConfig {
            retry_delay: config.retry_delay,
        },
        shared.clone(),
        bus.clone(),
    ));
    tokio::spawn(run_refresh_loop(shared.clone(), bus.clone()));
    tokio::spawn(run_status_loop(shared.clone()));

    if bus.request(FetchRequest::SystemState).await.is_err() {
        error!(event = "syncd_error", error = "request channel closed at startup");
        return;
    }

    info!(
        event = "syncd_start",
        base_url = %config.base_url,
        notify_url = %notify_url,
        retry_delay_ms = config.retry_delay.as_millis() as u64
    );

    let mut shutdown = shutdown_rx;
    loop {
        if shutdown.changed().await.is_err() {
            break;
        }
        if *shutdown.borrow() {
            break;
        }
    }

    if let Err(err) = api.logout().await {
        warn!(event = "logout_error", error = %err);
    }
    info!(event = "syncd_stop");
}

/// The device is often unreachable while the rover boots; keep trying at
/// the same fixed interval the state poller uses.
async fn login_with_retry(
    api: &mut DeviceClient,
    config: &Config,
    shared: &SharedState,
    mut shutdown: watch::Receiver<bool>,
) -> bool {
    shared.set_authenticating(true);
    loop {
        match api.login(&config.operator, &config.pin).await {
            Ok(_session) => {
                shared.set_logged_in(true);
                info!(event = "session_login", operator = %config.operator);
                return true;
            }
            Err(err) => {
                warn!(event = "session_login_error", error = %err);
            }
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
            _ = tokio::time::sleep(config.retry_delay) => {}
        }
    }
}

/// Periodic operator-facing snapshot of what the daemon believes, plus a
/// warning when the push channel has gone quiet.
async fn run_status_loop(shared: Arc<SharedState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        let session = shared.session();
        let condition = shared.system_condition();
        let job = shared.current_job();
        let point_count = shared
            .last_job_detail()
            .and_then(|detail| detail.point_count);
        info!(
            event = "sync_status",
            logged_in = session.is_logged_in,
            condition = %condition,
            job = job.as_ref().map(|j| j.name.as_str()).unwrap_or("-"),
            point_count = point_count.unwrap_or(0)
        );
        if let Some(age) = shared.last_notify_age() {
            if age > Duration::from_secs(NOTIFY_STALE_SECS) {
                warn!(event = "notify_stale", age_secs = age.as_secs());
            }
        }
    }
}

fn load_config(args: Args) -> Config {
    let base_url = resolve_base_url(&args.base_url);
    let notify_url = resolve_notify_url(&args.notify_url, &base_url);
    let operator = resolve_env_or_flag(&args.operator, "FDC_OPERATOR", "operator");
    let pin = resolve_env_or_flag(&args.pin, "FDC_PIN", "");
    let log_dir = resolve_env_or_flag(&args.log_dir, "FDC_LOG_DIR", ".fdc/logs");
    let debug = args.debug || env_true("FDC_DEBUG");
    Config {
        base_url,
        notify_url,
        operator,
        pin,
        retry_delay: Duration::from_millis(args.retry_delay_ms),
        log_dir,
        debug,
    }
}

fn resolve_base_url(flag: &str) -> String {
    resolve_env_or_flag(flag, "FDC_DEVICE_URL", "http://192.168.42.1:8080")
}

fn resolve_notify_url(flag: &str, base_url: &str) -> String {
    let resolved = resolve_env_or_flag(flag, "FDC_NOTIFY_URL", "");
    if !resolved.is_empty() {
        return resolved;
    }
    derive_notify_url(base_url)
}

/// The push channel lives on the same host as the REST surface unless
/// configured otherwise.
fn derive_notify_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    };
    format!("{ws_base}/notify")
}

fn resolve_env_or_flag(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("FDC_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap();
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap();
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let path = dir.join(format!("fdc-syncd-{}.log", std::process::id()));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .write(true)
        .open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}
