//! Reconnecting WebSocket transport to the hardware agent.
//!
//! One task owns the socket for its whole life: it dials the agent URL,
//! pumps envelopes both ways, and on any close or connect failure sleeps
//! a fixed delay and dials again, forever. Because a single task does the
//! dialing there is never more than one reconnect attempt pending.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::protocol::Envelope;
use crate::transport::{TransportEvent, TransportHandle};

/// Handle used to stop the transport task.
pub struct WsTransport {
    shutdown_tx: watch::Sender<bool>,
}

impl WsTransport {
    /// Spawn the link task; the returned [`TransportHandle`] feeds a
    /// [`crate::session::BridgeSession`].
    pub fn connect(url: String, reconnect_delay: Duration) -> (Self, TransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(64);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(link_loop(
            url,
            reconnect_delay,
            outbound_rx,
            event_tx,
            shutdown_rx,
        ));

        (
            Self { shutdown_tx },
            TransportHandle {
                outbound: outbound_tx,
                events: event_rx,
            },
        )
    }

    /// Stop reconnecting and close the link.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn link_loop(
    url: String,
    reconnect_delay: Duration,
    mut outbound: mpsc::Receiver<Envelope>,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(%url, error = %e, "Agent connect failed, retrying in {reconnect_delay:?}");
                if !wait_for_redial(reconnect_delay, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        info!(%url, "Agent link connected");
        if events.send(TransportEvent::Connected).await.is_err() {
            return;
        }

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        'connected: loop {
            tokio::select! {
                out = outbound.recv() => {
                    let Some(envelope) = out else {
                        // Session dropped its handle; nothing left to do.
                        let _ = ws_tx.close().await;
                        return;
                    };
                    let text = match serde_json::to_string(&envelope) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(error = %e, "Dropping unserializable envelope");
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        warn!(error = %e, "Agent link send failed");
                        break 'connected;
                    }
                }
                msg = ws_rx.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            warn!(error = %e, "Agent link error");
                            break 'connected;
                        }
                        None => {
                            info!("Agent link closed");
                            break 'connected;
                        }
                    };
                    let text = match msg {
                        Message::Text(t) => t,
                        Message::Close(_) => {
                            info!("Agent link closed by peer");
                            break 'connected;
                        }
                        Message::Ping(data) => {
                            let _ = ws_tx.send(Message::Pong(data)).await;
                            continue;
                        }
                        _ => continue,
                    };
                    match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => {
                            debug!(request_id = ?envelope.request_id(), "Envelope from agent");
                            if events.send(TransportEvent::Envelope(envelope)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Malformed envelope from agent; discarding");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // Err means the handle was dropped; treat it as shutdown,
                    // otherwise this branch would complete instantly on every
                    // poll and spin the task.
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = ws_tx.close().await;
                        let _ = events.send(TransportEvent::Disconnected).await;
                        return;
                    }
                }
            }
        }

        if events.send(TransportEvent::Disconnected).await.is_err() {
            return;
        }
        warn!("Agent link down, reconnecting in {reconnect_delay:?}");
        if !wait_for_redial(reconnect_delay, &mut shutdown).await {
            break;
        }
    }

    info!("Agent link loop stopped");
}

/// Wait out the reconnect delay; `false` means shutdown fired (or the
/// handle was dropped) and the link loop should stop instead of redialing.
async fn wait_for_redial(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}
