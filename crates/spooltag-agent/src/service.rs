//! WebSocket service speaking the bridge protocol.
//!
//! One bridge connection is served at a time. Tag operations block on the
//! radio, so each runs on a blocking task while the socket loop keeps
//! draining messages; a second request arriving mid-operation is answered
//! with a correlated ERROR instead of queueing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use spooltag_bridge::protocol::{self, Envelope};
use spooltag_keys::derive_keys;
use spooltag_types::config::{AgentConfig, KdfParams};
use spooltag_types::error::{SpooltagError, SpooltagResult};
use spooltag_types::tag::{KeySet, SectorKey, TagUid};

use crate::executor;
use crate::hardware::TagReader;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// The agent's listening half: bind once, then serve forever.
pub struct AgentService {
    listener: TcpListener,
    config: AgentConfig,
    reader: Arc<Mutex<Box<dyn TagReader>>>,
}

impl AgentService {
    /// Bind the listener configured in `config.listen_addr`.
    pub async fn bind(config: AgentConfig, reader: Box<dyn TagReader>) -> SpooltagResult<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        Ok(Self {
            listener,
            config,
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    /// The bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> SpooltagResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve bridge connections, one at a time.
    pub async fn serve(self) -> SpooltagResult<()> {
        info!(addr = %self.listener.local_addr()?, "Agent listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!(%peer, "Bridge connected");
            match handle_connection(stream, &self.config, Arc::clone(&self.reader)).await {
                Ok(()) => info!(%peer, "Bridge disconnected"),
                Err(e) => warn!(%peer, error = %e, "Connection ended with error"),
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    config: &AgentConfig,
    reader: Arc<Mutex<Box<dyn TagReader>>>,
) -> SpooltagResult<()> {
    let fallback = config.fallback_keys()?;
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| SpooltagError::Transport(e.to_string()))?;
    let (mut sink, mut source) = ws.split();

    send(
        &mut sink,
        &Envelope::Status {
            connected: true,
            device: config.device_name.clone(),
        },
    )
    .await?;

    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(32);
    let busy = Arc::new(AtomicBool::new(false));

    loop {
        tokio::select! {
            Some(envelope) = out_rx.recv() => {
                send(&mut sink, &envelope).await?;
            }
            message = source.next() => {
                let message = match message {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => return Err(SpooltagError::Transport(e.to_string())),
                    None => return Ok(()),
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => {
                            dispatch(envelope, config, &reader, &fallback, &busy, &out_tx).await;
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed message"),
                    },
                    Message::Ping(payload) => {
                        sink.send(Message::Pong(payload))
                            .await
                            .map_err(|e| SpooltagError::Transport(e.to_string()))?;
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

async fn send(sink: &mut WsSink, envelope: &Envelope) -> SpooltagResult<()> {
    let text = serde_json::to_string(envelope)
        .map_err(|e| SpooltagError::ProtocolViolation(e.to_string()))?;
    debug!(request_id = ?envelope.request_id(), "Sending envelope");
    sink.send(Message::Text(text))
        .await
        .map_err(|e| SpooltagError::Transport(e.to_string()))
}

async fn dispatch(
    envelope: Envelope,
    config: &AgentConfig,
    reader: &Arc<Mutex<Box<dyn TagReader>>>,
    fallback: &[SectorKey],
    busy: &Arc<AtomicBool>,
    out_tx: &mpsc::Sender<Envelope>,
) {
    match envelope {
        Envelope::ReadTag { request_id, keys } => {
            if busy.swap(true, Ordering::SeqCst) {
                let _ = out_tx
                    .send(Envelope::Error {
                        message: "another operation is in progress".to_string(),
                        request_id: Some(request_id),
                    })
                    .await;
                return;
            }
            let reader = Arc::clone(reader);
            let kdf = config.kdf.clone();
            let fallback = fallback.to_vec();
            let busy = Arc::clone(busy);
            let out = out_tx.clone();
            tokio::task::spawn_blocking(move || {
                let reply = match perform_read(&reader, &kdf, &fallback, keys, &request_id, &out)
                {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(%request_id, error = %e, "Read failed");
                        Envelope::Error {
                            message: e.to_string(),
                            request_id: Some(request_id),
                        }
                    }
                };
                let _ = out.blocking_send(reply);
                busy.store(false, Ordering::SeqCst);
            });
        }

        Envelope::WriteTag {
            request_id,
            keys,
            blocks,
            uid,
        } => {
            if busy.swap(true, Ordering::SeqCst) {
                let _ = out_tx
                    .send(Envelope::Error {
                        message: "another operation is in progress".to_string(),
                        request_id: Some(request_id),
                    })
                    .await;
                return;
            }
            let reader = Arc::clone(reader);
            let fallback = fallback.to_vec();
            let busy = Arc::clone(busy);
            let out = out_tx.clone();
            tokio::task::spawn_blocking(move || {
                let reply = match perform_write(&reader, &fallback, keys, blocks, uid, &out) {
                    Ok(report) => Envelope::WriteResult {
                        success: true,
                        blocks_written: report.blocks_written,
                        error: None,
                        request_id,
                    },
                    Err(e) => {
                        warn!(%request_id, error = %e, "Write failed");
                        Envelope::WriteResult {
                            success: false,
                            blocks_written: 0,
                            error: Some(e.to_string()),
                            request_id,
                        }
                    }
                };
                let _ = out.blocking_send(reply);
                busy.store(false, Ordering::SeqCst);
            });
        }

        other => {
            warn!(?other, "Unexpected envelope from bridge");
        }
    }
}

/// Blocking read path: wait for a tag, announce it, pick keys, read.
fn perform_read(
    reader: &Mutex<Box<dyn TagReader>>,
    kdf: &KdfParams,
    fallback: &[SectorKey],
    supplied: Option<Vec<String>>,
    request_id: &str,
    out: &mpsc::Sender<Envelope>,
) -> SpooltagResult<Envelope> {
    let mut reader = reader.lock().unwrap_or_else(PoisonError::into_inner);
    let mut tag = reader.wait_for_tag()?;
    let uid = tag.uid();
    info!(%uid, "Tag detected");
    let _ = out.blocking_send(Envelope::TagDetected { uid: uid.to_hex() });

    let keys = match supplied {
        Some(list) => KeySet::from_hex_list(&list)?,
        None => derive_keys(kdf, uid.as_bytes())?,
    };
    let result = executor::read_tag(tag.as_mut(), &keys, fallback);
    Ok(Envelope::TagData {
        uid: uid.to_hex(),
        blocks: protocol::encode_blocks(&result.image),
        request_id: request_id.to_string(),
        sectors_read: Some(result.readable.bits()),
    })
}

/// Blocking write path: decode the payload, wait for a tag, write it.
fn perform_write(
    reader: &Mutex<Box<dyn TagReader>>,
    fallback: &[SectorKey],
    keys: Vec<String>,
    blocks: Vec<String>,
    uid: Option<String>,
    out: &mpsc::Sender<Envelope>,
) -> SpooltagResult<executor::WriteReport> {
    let keys = KeySet::from_hex_list(&keys)?;
    let image = protocol::decode_blocks(&blocks)?;
    let target_uid = uid.map(|u| TagUid::from_hex(&u)).transpose()?;

    let mut reader = reader.lock().unwrap_or_else(PoisonError::into_inner);
    let mut tag = reader.wait_for_tag()?;
    info!(uid = %tag.uid(), "Tag detected");
    let _ = out.blocking_send(Envelope::TagDetected {
        uid: tag.uid().to_hex(),
    });

    executor::write_tag(tag.as_mut(), &keys, &image, fallback, target_uid.as_ref())
}
