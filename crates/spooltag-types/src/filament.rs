//! Decoded filament attributes from a spool tag.

use serde::{Deserialize, Serialize};

use crate::tag::TagUid;

/// Structured filament data decoded from a 1K spool tag.
///
/// Field positions and encodings are fixed by the tag layout (see the
/// codec crate); all multi-byte numerics are little-endian on the tag and
/// string fields are NUL-terminated ASCII within fixed-width slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilamentRecord {
    /// Factory uid from block 0 (hex on the wire).
    pub uid: TagUid,
    /// Material variant id, e.g. "A50-K0".
    pub material_variant_id: String,
    /// Material id, e.g. "GFA00".
    pub material_id: String,
    /// Short filament type, e.g. "PLA".
    pub filament_type: String,
    /// Full material name, e.g. "PLA Basic".
    pub detailed_filament_type: String,
    /// Primary color as R, G, B, A.
    pub color_rgba: [u8; 4],
    /// Secondary color (A, B, G, R) when `color_format == 2`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub secondary_color_abgr: Option<[u8; 4]>,
    /// Spool net weight in grams.
    pub spool_weight_g: u16,
    /// Filament diameter in millimeters.
    pub filament_diameter_mm: f32,
    pub drying_temp_c: u16,
    pub drying_time_h: u16,
    pub bed_temp_type: u16,
    pub bed_temp_c: u16,
    pub max_hotend_temp_c: u16,
    pub min_hotend_temp_c: u16,
    /// Opaque camera-calibration bytes from block 8.
    pub xcam_info: [u8; 12],
    /// Nozzle diameter in millimeters.
    pub nozzle_diameter: f32,
    /// Tray uid string from block 9.
    pub tray_uid: String,
    /// Spool width in millimeters (stored on-tag as mm × 100).
    pub spool_width_mm: f32,
    /// Production timestamp string, e.g. "2024_03_15_10_30".
    pub production_datetime: String,
    /// Short production timestamp string from block 13.
    pub short_production_datetime: String,
    /// Filament length in meters.
    pub filament_length_m: u16,
    /// Multi-color format (0 = single color, 2 = has secondary color).
    pub color_format: u16,
    pub color_count: u16,
    /// Whether the manufacturer signature region holds any non-zero bytes.
    pub has_rsa_signature: bool,
}

impl FilamentRecord {
    /// Primary color as a `#RRGGBB` hex string.
    pub fn color_hex(&self) -> String {
        format!(
            "#{:02X}{:02X}{:02X}",
            self.color_rgba[0], self.color_rgba[1], self.color_rgba[2]
        )
    }

    /// Alpha channel of the primary color (0-255).
    pub fn color_alpha(&self) -> u8 {
        self.color_rgba[3]
    }
}

impl Default for FilamentRecord {
    fn default() -> Self {
        Self {
            uid: TagUid::new([0; 4]),
            material_variant_id: String::new(),
            material_id: String::new(),
            filament_type: String::new(),
            detailed_filament_type: String::new(),
            color_rgba: [0, 0, 0, 0xFF],
            secondary_color_abgr: None,
            spool_weight_g: 0,
            filament_diameter_mm: 1.75,
            drying_temp_c: 0,
            drying_time_h: 0,
            bed_temp_type: 0,
            bed_temp_c: 0,
            max_hotend_temp_c: 0,
            min_hotend_temp_c: 0,
            xcam_info: [0; 12],
            nozzle_diameter: 0.0,
            tray_uid: String::new(),
            spool_width_mm: 0.0,
            production_datetime: String::new(),
            short_production_datetime: String::new(),
            filament_length_m: 0,
            color_format: 0,
            color_count: 0,
            has_rsa_signature: false,
        }
    }
}
