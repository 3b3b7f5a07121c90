//! Websocket notification channel for multi-device workout sync.
//!
//! [`run_realtime`] owns the connection for the lifetime of the process:
//! it dials once a credential is available, reconnects with doubling backoff,
//! announces the active session on every (re)connect, and forwards events
//! between the session engine and the studio backend. Frames that originated
//! from this device are dropped here so the engine only ever sees foreign
//! events.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use liftlog_api_types::{ClientEvent, ServerEvent};
use liftlog_core::{DeviceId, SessionSignature};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    /// Websocket endpoint, e.g. `ws://studio.local/api/ws`.
    pub url: String,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
}

impl RealtimeOptions {
    pub fn new(url: String) -> Self {
        Self {
            url,
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
        }
    }
}

/// Run the realtime channel until shutdown or until the engine goes away.
///
/// `auth_rx` gates the connection: no dial happens without a token, and a
/// rotated or cleared token drops the current connection. `active_rx` is
/// sampled on every (re)connect to announce the running session, so a device
/// that reconnects mid-workout asks its peers for the current state.
pub async fn run_realtime(
    options: RealtimeOptions,
    device_id: DeviceId,
    mut auth_rx: watch::Receiver<Option<String>>,
    active_rx: watch::Receiver<Option<SessionSignature>>,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
    inbound_tx: mpsc::Sender<ServerEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = options.reconnect_base;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        // Wait for a credential before dialing.
        let token = loop {
            let current = auth_rx.borrow().clone();
            if let Some(token) = current {
                break token;
            }
            tokio::select! {
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        };

        let url = format!("{}?token={}", options.url, token);
        let mut ws = match connect_async(url).await {
            Ok((ws, _)) => ws,
            Err(err) => {
                warn!("realtime connect failed: {err}, retrying in {backoff:?}");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
                backoff = next_backoff(backoff, options.reconnect_cap);
                continue;
            }
        };
        backoff = options.reconnect_base;
        info!("realtime channel connected");

        // Announce the running session so peers push their current state.
        // Copy out of the watch before awaiting; the guard must not cross it.
        let active = *active_rx.borrow();
        if let Some(signature) = active {
            let event = ClientEvent::SyncRequest {
                workout_plan_id: signature.workout_plan_id,
                training_id: signature.training_id,
                device_id: device_id.to_string(),
            };
            if send_event(&mut ws, &event).await.is_err() {
                let _ = ws.close(None).await;
                continue;
            }
        }

        loop {
            tokio::select! {
                message = ws.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            forward_inbound(text.as_str(), device_id.as_str(), &inbound_tx).await;
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            warn!("realtime channel lost, reconnecting");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
                event = outbound_rx.recv() => {
                    let Some(event) = event else {
                        // Engine gone: close out and stop for good.
                        let _ = ws.close(None).await;
                        return;
                    };
                    if send_event(&mut ws, &event).await.is_err() {
                        warn!("realtime send failed, reconnecting");
                        break;
                    }
                }
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        let _ = ws.close(None).await;
                        return;
                    }
                    debug!("credential changed, cycling realtime connection");
                    let _ = ws.close(None).await;
                    break;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            }
        }
    }
}

async fn send_event(
    ws: &mut WsStream,
    event: &ClientEvent,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match serde_json::to_string(event) {
        Ok(text) => ws.send(Message::Text(text.into())).await,
        Err(err) => {
            warn!("dropping unserializable realtime event: {err}");
            Ok(())
        }
    }
}

/// Parse one inbound frame and hand it to the engine.
///
/// Frames that fail to parse are ignored, as are echoes of this device's own
/// events.
async fn forward_inbound(text: &str, own_device: &str, tx: &mpsc::Sender<ServerEvent>) {
    let event: ServerEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(_) => {
            debug!("ignoring unrecognized realtime frame");
            return;
        }
    };
    if event.device_id() == own_device {
        debug!("ignoring realtime echo from this device");
        return;
    }
    let _ = tx.send(event).await;
}

fn next_backoff(current: Duration, cap: Duration) -> Duration {
    let next = current + current;
    if next > cap {
        cap
    } else {
        next
    }
}
