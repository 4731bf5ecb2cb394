//! Bridge session between the server and the remote tag-hardware agent.
//!
//! A [`session::BridgeSession`] owns a single transport link to the agent
//! and at most one in-flight tag operation. Callers suspend on
//! `request_read` / `request_write` until the agent replies with a
//! correlated response or the deadline passes; the physical side can only
//! handle one tag touch at a time, so concurrent requests are rejected
//! rather than queued.

pub mod protocol;
pub mod session;
pub mod transport;
pub mod ws;
