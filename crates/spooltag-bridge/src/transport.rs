//! Transport seam between the session and the agent link.
//!
//! The session never touches sockets directly: it sends agent-bound
//! envelopes into an mpsc channel and consumes [`TransportEvent`]s from
//! another. The WebSocket transport (see [`crate::ws`]) and the in-memory
//! test transport both speak this shape.

use tokio::sync::mpsc;

use crate::protocol::Envelope;

/// Events delivered from a transport to the session.
#[derive(Debug)]
pub enum TransportEvent {
    /// The link to the agent came up.
    Connected,
    /// The link dropped; the transport will keep reconnecting.
    Disconnected,
    /// An envelope arrived from the agent.
    Envelope(Envelope),
}

/// The session's half of a transport.
pub struct TransportHandle {
    /// Agent-bound envelopes.
    pub outbound: mpsc::Sender<Envelope>,
    /// Incoming events.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// The far side of an in-memory transport, driven directly by tests.
pub struct MemoryPeer {
    /// Envelopes the session sent.
    pub outbound: mpsc::Receiver<Envelope>,
    /// Feed for events toward the session.
    pub events: mpsc::Sender<TransportEvent>,
}

/// Build a connected in-memory transport pair.
pub fn memory_pair() -> (TransportHandle, MemoryPeer) {
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(64);
    (
        TransportHandle {
            outbound: outbound_tx,
            events: event_rx,
        },
        MemoryPeer {
            outbound: outbound_rx,
            events: event_tx,
        },
    )
}
