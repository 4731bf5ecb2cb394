//! Positional decoding of a tag image into a filament record.

use spooltag_types::error::SpooltagResult;
use spooltag_types::filament::FilamentRecord;
use spooltag_types::tag::TagImage;

use crate::layout::{
    read_f32_le, read_string, read_u16_le, signature_blocks, BLOCK_COLOR, BLOCK_COLOR_INFO,
    BLOCK_DETAILED_TYPE, BLOCK_FILAMENT_LENGTH, BLOCK_FILAMENT_TYPE, BLOCK_MATERIAL_IDS,
    BLOCK_PRODUCTION_DATETIME, BLOCK_SHORT_DATETIME, BLOCK_SPOOL_WIDTH, BLOCK_TEMPS,
    BLOCK_TRAY_UID, BLOCK_XCAM, SIGNATURE_LEN,
};

/// Decode a complete tag image into a [`FilamentRecord`].
///
/// Total over well-formed images; size violations are rejected when the
/// [`TagImage`] is constructed. No field depends on any other except the
/// secondary color, which is only meaningful when `color_format == 2`.
pub fn decode(image: &TagImage) -> FilamentRecord {
    let mut record = FilamentRecord {
        uid: image.uid(),
        ..Default::default()
    };

    record.material_variant_id = read_string(image.block(BLOCK_MATERIAL_IDS), 0, 8);
    record.material_id = read_string(image.block(BLOCK_MATERIAL_IDS), 8, 8);
    record.filament_type = read_string(image.block(BLOCK_FILAMENT_TYPE), 0, 16);
    record.detailed_filament_type = read_string(image.block(BLOCK_DETAILED_TYPE), 0, 16);

    let color = image.block(BLOCK_COLOR).as_bytes();
    record.color_rgba = [color[0], color[1], color[2], color[3]];
    record.spool_weight_g = read_u16_le(image.block(BLOCK_COLOR), 4);
    record.filament_diameter_mm = read_f32_le(image.block(BLOCK_COLOR), 8);

    let temps = image.block(BLOCK_TEMPS);
    record.drying_temp_c = read_u16_le(temps, 0);
    record.drying_time_h = read_u16_le(temps, 2);
    record.bed_temp_type = read_u16_le(temps, 4);
    record.bed_temp_c = read_u16_le(temps, 6);
    record.max_hotend_temp_c = read_u16_le(temps, 8);
    record.min_hotend_temp_c = read_u16_le(temps, 10);

    record
        .xcam_info
        .copy_from_slice(&image.block(BLOCK_XCAM).as_bytes()[..12]);
    record.nozzle_diameter = read_f32_le(image.block(BLOCK_XCAM), 12);
    record.tray_uid = read_string(image.block(BLOCK_TRAY_UID), 0, 16);
    record.spool_width_mm = f32::from(read_u16_le(image.block(BLOCK_SPOOL_WIDTH), 4)) / 100.0;

    record.production_datetime = read_string(image.block(BLOCK_PRODUCTION_DATETIME), 0, 16);
    record.short_production_datetime = read_string(image.block(BLOCK_SHORT_DATETIME), 0, 16);
    record.filament_length_m = read_u16_le(image.block(BLOCK_FILAMENT_LENGTH), 4);

    record.color_format = read_u16_le(image.block(BLOCK_COLOR_INFO), 0);
    record.color_count = read_u16_le(image.block(BLOCK_COLOR_INFO), 2);
    if record.color_format == 2 {
        let b = image.block(BLOCK_COLOR_INFO).as_bytes();
        record.secondary_color_abgr = Some([b[4], b[5], b[6], b[7]]);
    }

    record.has_rsa_signature = signature_present(image);
    record
}

/// Decode a raw 1024-byte dump; wrong sizes fail with `MalformedImage`.
pub fn decode_bytes(data: &[u8]) -> SpooltagResult<FilamentRecord> {
    Ok(decode(&TagImage::from_bytes(data)?))
}

/// Whether the signature region (sectors 10..15, first 256 bytes of their
/// data blocks) holds any non-zero byte.
fn signature_present(image: &TagImage) -> bool {
    let mut seen = 0;
    for addr in signature_blocks() {
        for &byte in image.block(addr).as_bytes() {
            if seen == SIGNATURE_LEN {
                return false;
            }
            if byte != 0 {
                return true;
            }
            seen += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use spooltag_types::error::SpooltagError;
    use spooltag_types::tag::Block;

    fn image_with_block(addr: usize, bytes: [u8; 16]) -> TagImage {
        let mut image = TagImage::zeroed();
        *image.block_mut(addr) = Block(bytes);
        image
    }

    #[test]
    fn test_zero_image_decodes_to_zero_fields() {
        let record = decode(&TagImage::zeroed());
        assert_eq!(record.spool_weight_g, 0);
        assert_eq!(record.drying_temp_c, 0);
        assert_eq!(record.filament_length_m, 0);
        assert_eq!(record.color_format, 0);
        assert_eq!(record.filament_type, "");
        assert!(!record.has_rsa_signature);
        assert!(record.secondary_color_abgr.is_none());
    }

    #[test]
    fn test_wrong_size_is_malformed() {
        assert!(matches!(
            decode_bytes(&[0u8; 1000]),
            Err(SpooltagError::MalformedImage(_))
        ));
    }

    // Pinned fixture: the literal block-5 byte pattern shared across ports.
    #[test]
    fn test_block5_fixture() {
        let image = image_with_block(
            5,
            [
                0xAA, 0xBB, 0xCC, 0xFF, 0xE8, 0x03, 0x00, 0x00, 0x00, 0x00, 0x1C, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ],
        );
        let record = decode(&image);
        assert_eq!(record.color_hex(), "#AABBCC");
        assert_eq!(record.color_alpha(), 255);
        assert_eq!(record.spool_weight_g, 1000);
        // Raw float bits as stored (a denormal); compare bit-exact.
        assert_eq!(
            record.filament_diameter_mm.to_bits(),
            u32::from_le_bytes([0x00, 0x00, 0x1C, 0x00])
        );
    }

    #[test]
    fn test_string_fields() {
        let mut image = TagImage::zeroed();
        image.block_mut(1).0[..6].copy_from_slice(b"A50-K0");
        image.block_mut(1).0[8..13].copy_from_slice(b"GFA00");
        image.block_mut(2).0[..3].copy_from_slice(b"PLA");
        image.block_mut(4).0[..9].copy_from_slice(b"PLA Basic");
        image.block_mut(9).0[..8].copy_from_slice(b"TRAY0001");
        let record = decode(&image);
        assert_eq!(record.material_variant_id, "A50-K0");
        assert_eq!(record.material_id, "GFA00");
        assert_eq!(record.filament_type, "PLA");
        assert_eq!(record.detailed_filament_type, "PLA Basic");
        assert_eq!(record.tray_uid, "TRAY0001");
    }

    #[test]
    fn test_temperatures_and_width() {
        let mut image = TagImage::zeroed();
        let temps = image.block_mut(6);
        temps.0[0..2].copy_from_slice(&55u16.to_le_bytes());
        temps.0[2..4].copy_from_slice(&8u16.to_le_bytes());
        temps.0[4..6].copy_from_slice(&1u16.to_le_bytes());
        temps.0[6..8].copy_from_slice(&60u16.to_le_bytes());
        temps.0[8..10].copy_from_slice(&230u16.to_le_bytes());
        temps.0[10..12].copy_from_slice(&190u16.to_le_bytes());
        image.block_mut(10).0[4..6].copy_from_slice(&5600u16.to_le_bytes());
        image.block_mut(14).0[4..6].copy_from_slice(&330u16.to_le_bytes());

        let record = decode(&image);
        assert_eq!(record.drying_temp_c, 55);
        assert_eq!(record.drying_time_h, 8);
        assert_eq!(record.bed_temp_type, 1);
        assert_eq!(record.bed_temp_c, 60);
        assert_eq!(record.max_hotend_temp_c, 230);
        assert_eq!(record.min_hotend_temp_c, 190);
        assert!((record.spool_width_mm - 56.0).abs() < 0.001);
        assert_eq!(record.filament_length_m, 330);
    }

    #[test]
    fn test_secondary_color_requires_format_2() {
        let mut image = TagImage::zeroed();
        image.block_mut(16).0[0..2].copy_from_slice(&2u16.to_le_bytes());
        image.block_mut(16).0[2..4].copy_from_slice(&2u16.to_le_bytes());
        image.block_mut(16).0[4..8].copy_from_slice(&[0xFF, 0x11, 0x22, 0x33]);
        let record = decode(&image);
        assert_eq!(record.color_format, 2);
        assert_eq!(record.secondary_color_abgr, Some([0xFF, 0x11, 0x22, 0x33]));

        // Same bytes but format 0: field is ignored.
        image.block_mut(16).0[0..2].copy_from_slice(&0u16.to_le_bytes());
        assert!(decode(&image).secondary_color_abgr.is_none());
    }

    #[test]
    fn test_signature_presence() {
        let mut image = TagImage::zeroed();
        assert!(!decode(&image).has_rsa_signature);

        // A byte in the first signature block (40) is inside the 256 bytes.
        image.block_mut(40).0[0] = 0x01;
        assert!(decode(&image).has_rsa_signature);

        // A byte beyond the consumed 256 bytes does not count: 256 bytes =
        // exactly 16 data blocks, so block 61 (the 17th) is past the end.
        let mut image = TagImage::zeroed();
        image.block_mut(61).0[5] = 0x01;
        assert!(!decode(&image).has_rsa_signature);
    }
}
