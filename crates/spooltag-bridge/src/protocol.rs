//! Wire protocol envelopes exchanged with the hardware agent.
//!
//! All messages are single JSON objects tagged by an `action` field.
//! Sector keys travel as 12-char uppercase hex, blocks as base64 of
//! exactly 16 raw bytes, uids as 8-char hex.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use spooltag_types::error::SpooltagResult;
use spooltag_types::tag::TagImage;

/// A protocol envelope, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Envelope {
    /// Session → agent: wait for a tag touch and read all 64 blocks.
    ///
    /// Keys are optional: the uid is usually unknown until tag contact,
    /// in which case the agent derives sector keys locally from the
    /// detected uid.
    #[serde(rename = "READ_TAG")]
    ReadTag {
        request_id: String,
        /// 16 sector keys, hex, in sector order.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        keys: Option<Vec<String>>,
    },

    /// Session → agent: wait for a tag touch and write the payload blocks.
    #[serde(rename = "WRITE_TAG")]
    WriteTag {
        request_id: String,
        /// 16 sector keys, hex, in sector order.
        keys: Vec<String>,
        /// 64 base64 blocks; block 0 and trailers are present but never
        /// written.
        blocks: Vec<String>,
        /// Target uid for identifier-rewriting tags; rejected by agents
        /// whose hardware cannot honor it.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        uid: Option<String>,
    },

    /// Agent → session: connection hello with the device name.
    #[serde(rename = "STATUS")]
    Status {
        connected: bool,
        device: String,
    },

    /// Agent → session: a tag touched the reader.
    #[serde(rename = "TAG_DETECTED")]
    TagDetected {
        uid: String,
    },

    /// Agent → session: full image read in reply to READ_TAG.
    #[serde(rename = "TAG_DATA")]
    TagData {
        uid: String,
        blocks: Vec<String>,
        request_id: String,
        /// Per-sector readability bitmask; absent means all sectors read.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        sectors_read: Option<u16>,
    },

    /// Agent → session: outcome of a WRITE_TAG.
    #[serde(rename = "WRITE_RESULT")]
    WriteResult {
        success: bool,
        blocks_written: u32,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
        request_id: String,
    },

    /// Agent → session: failure outside a specific response.
    #[serde(rename = "ERROR")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        request_id: Option<String>,
    },
}

impl Envelope {
    /// The correlation id carried by this envelope, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Envelope::ReadTag { request_id, .. }
            | Envelope::WriteTag { request_id, .. }
            | Envelope::TagData { request_id, .. }
            | Envelope::WriteResult { request_id, .. } => Some(request_id),
            Envelope::Error { request_id, .. } => request_id.as_deref(),
            Envelope::Status { .. } | Envelope::TagDetected { .. } => None,
        }
    }
}

/// Encode an image as 64 base64 blocks, the wire form.
pub fn encode_blocks(image: &TagImage) -> Vec<String> {
    image
        .blocks()
        .iter()
        .map(|b| BASE64.encode(b.as_bytes()))
        .collect()
}

/// Decode 64 base64 blocks back into an image.
pub fn decode_blocks(blocks: &[String]) -> SpooltagResult<TagImage> {
    spooltag_codec::dump::from_base64_blocks(blocks)
}
