//! Reference hardware agent.
//!
//! Runs on the device that can physically touch tags. Listens for bridge
//! connections, waits for tag contact, and executes sector-by-sector
//! authenticate/read-or-write using supplied or locally-derived keys.
//! Hardware calls are blocking, so they run on a dedicated blocking task
//! while the message loop stays responsive.

pub mod executor;
pub mod hardware;
pub mod service;

#[cfg(test)]
mod mock;
