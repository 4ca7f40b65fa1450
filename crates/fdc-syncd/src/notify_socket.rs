use crate::state::SharedState;
use fdc_core::notify_ipc::{
    decode_frame, encode_frame, NotifyVersion, PushEnvelope, SubscribeRequest,
};
use fdc_sync::{SyncBus, SyncEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type NotifyStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct NotifySocketConfig {
    pub notify_url: Url,
    pub client_id: String,
    pub max_frame_bytes: usize,
}

/// Holds the push-notification subscription open for the life of the
/// daemon, reconnecting with a doubling backoff that resets after each
/// successful connect. Heartbeats only refresh channel liveness; every
/// other message is published as a push event.
pub async fn run_notify_socket(
    config: NotifySocketConfig,
    shared: Arc<SharedState>,
    bus: SyncBus,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_secs(1);
    loop {
        if *shutdown.borrow() {
            return;
        }

        let connect = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
                continue;
            }
            connect = connect_async(config.notify_url.as_str()) => connect,
        };

        let (mut ws, _) = match connect {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "notify_connect_error", error = %err);
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(1);
        info!(event = "notify_connected", url = %config.notify_url);

        if !send_subscribe(&mut ws, &config).await {
            let _ = ws.close(None).await;
            continue;
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_frame(text.as_bytes(), &config, &shared, &bus);
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            handle_frame(&bytes, &config, &shared, &bus);
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(event = "notify_socket_error", error = %err);
                            break;
                        }
                    }
                }
            }
        }

        let _ = ws.close(None).await;
        warn!(event = "notify_disconnected", url = %config.notify_url);
    }
}

async fn send_subscribe(ws: &mut NotifyStream, config: &NotifySocketConfig) -> bool {
    let subscribe = SubscribeRequest {
        version: NotifyVersion::CURRENT,
        client_id: config.client_id.clone(),
        topics: vec!["system_state".to_string(), "jobs".to_string()],
    };
    let frame = match encode_frame(&subscribe, config.max_frame_bytes) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(event = "notify_subscribe_encode_error", error = %err);
            return false;
        }
    };
    let text = String::from_utf8_lossy(&frame).to_string();
    if ws.send(Message::Text(text)).await.is_err() {
        warn!(event = "notify_subscribe_error");
        return false;
    }
    true
}

fn handle_frame(bytes: &[u8], config: &NotifySocketConfig, shared: &SharedState, bus: &SyncBus) {
    match decode_frame::<PushEnvelope>(bytes, config.max_frame_bytes) {
        Ok(envelope) => {
            shared.touch_notify();
            if envelope.msg.is_heartbeat() {
                debug!(event = "notify_heartbeat", device = %envelope.device_id);
            } else {
                bus.publish(SyncEvent::PushReceived(envelope));
            }
        }
        Err(err) => {
            warn!(event = "notify_decode_error", error = %err);
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}
