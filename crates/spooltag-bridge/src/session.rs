//! The bridge session state machine.
//!
//! A session owns one transport link and a single pending-request slot:
//! `Idle → AwaitingTag → Idle`. The physical side can only process one
//! tag touch at a time, so a second request while one is outstanding is
//! rejected with `RequestInProgress` instead of being queued; silent
//! queuing would let a stale request consume a tag touch meant for a
//! newer one.
//!
//! Responses are paired to requests by correlation id. A response whose
//! id does not match the pending request (including late responses to
//! already-timed-out requests) is logged as a protocol violation and
//! discarded; it never affects the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use spooltag_codec::{decode, merge_payload};
use spooltag_keys::derive_keys;
use spooltag_types::config::BridgeConfig;
use spooltag_types::error::{SpooltagError, SpooltagResult};
use spooltag_types::filament::FilamentRecord;
use spooltag_types::tag::{KeySet, SectorMask, TagImage, TagUid};

use crate::protocol::{decode_blocks, encode_blocks, Envelope};
use crate::transport::{TransportEvent, TransportHandle};

/// What kind of tag operation a pending request is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

/// Result of a completed read: the raw image plus the decoded record.
///
/// An all-zero sector whose bit is clear in `readable` was unreadable
/// (every candidate key failed authentication), not intentionally zero.
#[derive(Debug, Clone)]
pub struct TagReadOutcome {
    pub uid: TagUid,
    pub image: TagImage,
    pub readable: SectorMask,
    pub record: FilamentRecord,
}

/// Result of a completed write.
///
/// `blocks_written` can fall short of the payload size: sectors that
/// failed authentication (or had no key) are skipped, never fatal.
#[derive(Debug, Clone, Copy)]
pub struct WriteOutcome {
    pub blocks_written: u32,
}

/// Agent status surfaced to observers via a watch channel.
#[derive(Debug, Clone, Default)]
pub struct BridgeStatus {
    pub connected: bool,
    /// Device name from the agent's STATUS hello.
    pub device: Option<String>,
    /// Uid of the most recently detected tag.
    pub last_tag: Option<String>,
}

struct Pending {
    id: String,
    reply: oneshot::Sender<AgentReply>,
}

enum AgentReply {
    TagData {
        uid: String,
        blocks: Vec<String>,
        sectors_read: Option<u16>,
    },
    WriteResult {
        success: bool,
        blocks_written: u32,
        error: Option<String>,
    },
    Failed(SpooltagError),
}

struct Shared {
    pending: Mutex<Option<Pending>>,
    connected: AtomicBool,
}

/// Coordinator for tag operations against one remote hardware agent.
pub struct BridgeSession {
    outbound: tokio::sync::mpsc::Sender<Envelope>,
    shared: Arc<Shared>,
    status_rx: watch::Receiver<BridgeStatus>,
    config: BridgeConfig,
}

impl BridgeSession {
    /// Build a session over a transport and start its dispatch task.
    pub fn new(config: BridgeConfig, transport: TransportHandle) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(None),
            connected: AtomicBool::new(false),
        });
        let (status_tx, status_rx) = watch::channel(BridgeStatus::default());

        tokio::spawn(dispatch_loop(transport.events, shared.clone(), status_tx));

        Self {
            outbound: transport.outbound,
            shared,
            status_rx,
            config,
        }
    }

    /// Whether an agent link is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Observe connection state and tag-detection events.
    pub fn status(&self) -> watch::Receiver<BridgeStatus> {
        self.status_rx.clone()
    }

    /// Ask the agent to read the next tag touched to the reader.
    ///
    /// Suspends until the correlated TAG_DATA arrives or `timeout`
    /// elapses. The agent derives sector keys from the detected uid, so
    /// none are sent with the request.
    pub async fn request_read(&self, timeout: Duration) -> SpooltagResult<TagReadOutcome> {
        let (id, rx) = self.begin(RequestKind::Read)?;
        self.send(
            &id,
            Envelope::ReadTag {
                request_id: id.clone(),
                keys: None,
            },
        )
        .await?;

        match self.await_reply(&id, rx, timeout).await? {
            AgentReply::TagData {
                uid,
                blocks,
                sectors_read,
            } => {
                let image = decode_blocks(&blocks)?;
                let uid = TagUid::from_hex(&uid)
                    .map_err(|_| SpooltagError::ProtocolViolation(format!("bad uid: {uid}")))?;
                let readable = sectors_read.map(SectorMask::from_bits).unwrap_or_default();
                let record = decode(&image);
                Ok(TagReadOutcome {
                    uid,
                    image,
                    readable,
                    record,
                })
            }
            AgentReply::WriteResult { .. } => Err(SpooltagError::ProtocolViolation(
                "WRITE_RESULT in reply to READ_TAG".to_string(),
            )),
            AgentReply::Failed(e) => Err(e),
        }
    }

    /// Ask the agent to write a full image to the next tag touched.
    ///
    /// Sector keys are derived from the uid embedded in the image's block
    /// 0, so the target is expected to be the same tag (or a blank one
    /// reachable through the agent's default-key fallback).
    pub async fn request_write(
        &self,
        image: &TagImage,
        timeout: Duration,
    ) -> SpooltagResult<WriteOutcome> {
        let keys = derive_keys(&self.config.kdf, image.uid().as_bytes())?;
        self.write_inner(keys, encode_blocks(image), None, timeout)
            .await
    }

    /// Clone a previously dumped tag onto the next tag touched.
    ///
    /// Only payload blocks are forwarded; block 0 and sector trailers
    /// from the source are masked out. With `rewrite_uid` the source uid
    /// is sent as a rewrite target; agents whose hardware cannot rewrite
    /// identifiers fail such writes with an explicit error rather than
    /// silently ignoring it.
    pub async fn request_clone(
        &self,
        source_uid: TagUid,
        source_image: &TagImage,
        rewrite_uid: bool,
        timeout: Duration,
    ) -> SpooltagResult<WriteOutcome> {
        let payload = merge_payload(&TagImage::zeroed(), source_image);
        let keys = derive_keys(&self.config.kdf, source_uid.as_bytes())?;
        let target = rewrite_uid.then(|| source_uid.to_hex());
        self.write_inner(keys, encode_blocks(&payload), target, timeout)
            .await
    }

    async fn write_inner(
        &self,
        keys: KeySet,
        blocks: Vec<String>,
        uid: Option<String>,
        timeout: Duration,
    ) -> SpooltagResult<WriteOutcome> {
        let (id, rx) = self.begin(RequestKind::Write)?;
        self.send(
            &id,
            Envelope::WriteTag {
                request_id: id.clone(),
                keys: keys.to_hex_list(),
                blocks,
                uid,
            },
        )
        .await?;

        match self.await_reply(&id, rx, timeout).await? {
            AgentReply::WriteResult {
                success,
                blocks_written,
                error,
            } => {
                if success {
                    Ok(WriteOutcome { blocks_written })
                } else {
                    Err(SpooltagError::Agent(
                        error.unwrap_or_else(|| "write failed".to_string()),
                    ))
                }
            }
            AgentReply::TagData { .. } => Err(SpooltagError::ProtocolViolation(
                "TAG_DATA in reply to WRITE_TAG".to_string(),
            )),
            AgentReply::Failed(e) => Err(e),
        }
    }

    /// Claim the single pending slot, or fail without touching it.
    fn begin(&self, kind: RequestKind) -> SpooltagResult<(String, oneshot::Receiver<AgentReply>)> {
        if !self.is_connected() {
            return Err(SpooltagError::NoBridgeConnected);
        }
        let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
        if pending.is_some() {
            return Err(SpooltagError::RequestInProgress);
        }
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        *pending = Some(Pending {
            id: id.clone(),
            reply: tx,
        });
        debug!(request_id = %id, ?kind, "Tag request pending");
        Ok((id, rx))
    }

    async fn send(&self, id: &str, envelope: Envelope) -> SpooltagResult<()> {
        if self.outbound.send(envelope).await.is_err() {
            self.clear_if_current(id);
            return Err(SpooltagError::NoBridgeConnected);
        }
        Ok(())
    }

    async fn await_reply(
        &self,
        id: &str,
        rx: oneshot::Receiver<AgentReply>,
        timeout: Duration,
    ) -> SpooltagResult<AgentReply> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Dispatch dropped the sender without replying; treat as a
            // lost link.
            Ok(Err(_)) => Err(SpooltagError::NoBridgeConnected),
            Err(_) => {
                // The deadline passed. Hardware I/O already started on the
                // agent cannot be cancelled from here; a response arriving
                // later is dropped by the correlation check.
                self.clear_if_current(id);
                Err(SpooltagError::Timeout)
            }
        }
    }

    fn clear_if_current(&self, id: &str) {
        let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
        if pending.as_ref().is_some_and(|p| p.id == id) {
            *pending = None;
        }
    }
}

/// Consume transport events and complete (or discard) pending requests.
async fn dispatch_loop(
    mut events: tokio::sync::mpsc::Receiver<TransportEvent>,
    shared: Arc<Shared>,
    status_tx: watch::Sender<BridgeStatus>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                shared.connected.store(true, Ordering::SeqCst);
                status_tx.send_modify(|s| s.connected = true);
                info!("Bridge agent link up");
            }
            TransportEvent::Disconnected => {
                shared.connected.store(false, Ordering::SeqCst);
                status_tx.send_modify(|s| {
                    s.connected = false;
                    s.device = None;
                });
                // The outstanding request fails now rather than waiting
                // out its deadline.
                if let Some(p) = shared.pending.lock().expect("pending lock poisoned").take() {
                    warn!(request_id = %p.id, "Agent disconnected with a request in flight");
                    let _ = p.reply.send(AgentReply::Failed(SpooltagError::NoBridgeConnected));
                }
            }
            TransportEvent::Envelope(envelope) => {
                handle_envelope(&shared, &status_tx, envelope);
            }
        }
    }
    debug!("Transport event stream ended; session dispatch stopping");
}

fn handle_envelope(shared: &Shared, status_tx: &watch::Sender<BridgeStatus>, envelope: Envelope) {
    match envelope {
        Envelope::Status { connected, device } => {
            info!(%device, connected, "Agent status");
            status_tx.send_modify(|s| s.device = Some(device.clone()));
        }
        Envelope::TagDetected { uid } => {
            info!(%uid, "Tag detected");
            status_tx.send_modify(|s| s.last_tag = Some(uid.clone()));
        }
        Envelope::TagData {
            uid,
            blocks,
            request_id,
            sectors_read,
        } => {
            complete(
                shared,
                &request_id,
                AgentReply::TagData {
                    uid,
                    blocks,
                    sectors_read,
                },
            );
        }
        Envelope::WriteResult {
            success,
            blocks_written,
            error,
            request_id,
        } => {
            complete(
                shared,
                &request_id,
                AgentReply::WriteResult {
                    success,
                    blocks_written,
                    error,
                },
            );
        }
        Envelope::Error {
            message,
            request_id,
        } => {
            error!(%message, "Agent error");
            let mut pending = shared.pending.lock().expect("pending lock poisoned");
            let matches = match (&request_id, pending.as_ref()) {
                // A correlated error must match the pending request.
                (Some(rid), Some(p)) => p.id == *rid,
                // An uncorrelated error fails whatever is outstanding.
                (None, Some(_)) => true,
                _ => false,
            };
            if matches {
                if let Some(p) = pending.take() {
                    let _ = p.reply.send(AgentReply::Failed(SpooltagError::Agent(message)));
                }
            } else if request_id.is_some() {
                warn!("Discarding agent error for an unknown request id");
            }
        }
        Envelope::ReadTag { .. } | Envelope::WriteTag { .. } => {
            warn!("Protocol violation: session-originated action received from the agent");
        }
    }
}

/// Complete the pending request iff the correlation id matches; replies
/// for unknown ids are dropped. A correlated reply of the wrong kind (a
/// WRITE_RESULT answering a read) is delivered anyway and rejected by the
/// typed request path, so the caller fails fast instead of waiting out
/// its deadline.
fn complete(shared: &Shared, request_id: &str, reply: AgentReply) {
    let mut pending = shared.pending.lock().expect("pending lock poisoned");
    match pending.as_ref() {
        Some(p) if p.id == request_id => {
            if let Some(p) = pending.take() {
                let _ = p.reply.send(reply);
            }
        }
        Some(p) => {
            warn!(
                got = %request_id,
                expected = %p.id,
                "Protocol violation: response does not match the pending request; discarding"
            );
        }
        None => {
            // Typical after a timeout: the agent finished anyway.
            warn!(
                request_id = %request_id,
                "Discarding response with no pending request (late reply?)"
            );
        }
    }
}
