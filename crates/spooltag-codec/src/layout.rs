//! Block and offset layout of the spool tag format.
//!
//! | Block | Offset | Width | Field |
//! |-------|--------|-------|------------------------------|
//! | 0     | 0      | 4     | uid (factory, read-only)     |
//! | 1     | 0      | 8     | material_variant_id          |
//! | 1     | 8      | 8     | material_id                  |
//! | 2     | 0      | 16    | filament_type                |
//! | 4     | 0      | 16    | detailed_filament_type       |
//! | 5     | 0      | 4     | color RGBA                   |
//! | 5     | 4      | 2     | spool_weight_g (u16 LE)      |
//! | 5     | 8      | 4     | filament_diameter_mm (f32)   |
//! | 6     | 0..12  | 2×6   | temperatures (u16 LE each)   |
//! | 8     | 0      | 12    | xcam_info                    |
//! | 8     | 12     | 4     | nozzle_diameter (f32 LE)     |
//! | 9     | 0      | 16    | tray_uid                     |
//! | 10    | 4      | 2     | spool_width × 100 (u16 LE)   |
//! | 12    | 0      | 16    | production_datetime          |
//! | 13    | 0      | 16    | short_production_datetime    |
//! | 14    | 4      | 2     | filament_length_m (u16 LE)   |
//! | 16    | 0      | 2     | color_format (u16 LE)        |
//! | 16    | 2      | 2     | color_count (u16 LE)         |
//! | 16    | 4      | 4     | secondary color ABGR         |
//!
//! Sectors 10..15 carry an RSA-2048 signature across their three data
//! blocks each (288 bytes of slots, 256 bytes used).

use spooltag_types::tag::{sector_data_blocks, Block};

pub const BLOCK_MANUFACTURER: usize = 0;
pub const BLOCK_MATERIAL_IDS: usize = 1;
pub const BLOCK_FILAMENT_TYPE: usize = 2;
pub const BLOCK_DETAILED_TYPE: usize = 4;
pub const BLOCK_COLOR: usize = 5;
pub const BLOCK_TEMPS: usize = 6;
pub const BLOCK_XCAM: usize = 8;
pub const BLOCK_TRAY_UID: usize = 9;
pub const BLOCK_SPOOL_WIDTH: usize = 10;
pub const BLOCK_PRODUCTION_DATETIME: usize = 12;
pub const BLOCK_SHORT_DATETIME: usize = 13;
pub const BLOCK_FILAMENT_LENGTH: usize = 14;
pub const BLOCK_COLOR_INFO: usize = 16;

/// First and last+1 sector of the signature region.
pub const SIGNATURE_SECTORS: std::ops::Range<usize> = 10..16;
/// Bytes of the signature region actually used (RSA-2048).
pub const SIGNATURE_LEN: usize = 256;

/// Data block addresses holding the signature, in on-tag order.
pub fn signature_blocks() -> Vec<usize> {
    SIGNATURE_SECTORS
        .flat_map(|s| sector_data_blocks(s).into_iter())
        .collect()
}

/// Read a NUL-terminated ASCII string from a fixed-width slot, trimmed of
/// surrounding whitespace. Slots with no NUL use the full width.
pub(crate) fn read_string(block: &Block, offset: usize, width: usize) -> String {
    let slot = &block.as_bytes()[offset..offset + width];
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).trim().to_string()
}

pub(crate) fn read_u16_le(block: &Block, offset: usize) -> u16 {
    let b = block.as_bytes();
    u16::from_le_bytes([b[offset], b[offset + 1]])
}

pub(crate) fn read_f32_le(block: &Block, offset: usize) -> f32 {
    let b = block.as_bytes();
    f32::from_le_bytes([b[offset], b[offset + 1], b[offset + 2], b[offset + 3]])
}

pub(crate) fn write_u16_le(block: &mut Block, offset: usize, value: u16) {
    block.0[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_f32_le(block: &mut Block, offset: usize, value: f32) {
    block.0[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
