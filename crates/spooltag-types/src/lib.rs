//! Core types for the spooltag RFID toolchain.
//!
//! This crate defines the shared data structures used across the codec,
//! key-derivation, bridge and agent crates. It contains no business logic.

pub mod config;
pub mod error;
pub mod filament;
pub mod tag;
