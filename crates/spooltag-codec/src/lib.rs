//! Binary layout codec for 1K spool tag images.
//!
//! Converts between raw 64-block tag images and structured
//! [`FilamentRecord`](spooltag_types::filament::FilamentRecord)s. Field
//! positions are fixed by the community-documented tag layout; extraction
//! is purely positional and every multi-byte numeric is little-endian.

pub mod decode;
pub mod dump;
pub mod encode;
pub mod layout;

pub use decode::{decode, decode_bytes};
pub use encode::{encode, merge_payload};
