//! Encoding a filament record back into tag payload blocks.
//!
//! Only writer-controlled fields are populated: block 0 (manufacturer
//! data) and sector trailers are left zero and must be merged in from a
//! template or an existing dump by the caller. Values that do not fit
//! their fixed-width slot fail with `FieldOutOfRange`; nothing is
//! saturated or silently truncated.

use spooltag_types::error::{SpooltagError, SpooltagResult};
use spooltag_types::filament::FilamentRecord;
use spooltag_types::tag::{is_payload_block, Block, TagImage, TOTAL_BLOCKS};

use crate::layout::{
    write_f32_le, write_u16_le, BLOCK_COLOR, BLOCK_COLOR_INFO, BLOCK_DETAILED_TYPE,
    BLOCK_FILAMENT_LENGTH, BLOCK_FILAMENT_TYPE, BLOCK_MATERIAL_IDS, BLOCK_PRODUCTION_DATETIME,
    BLOCK_SHORT_DATETIME, BLOCK_SPOOL_WIDTH, BLOCK_TEMPS, BLOCK_TRAY_UID, BLOCK_XCAM,
};

/// Encode the writer-controlled fields of a record into a tag image.
pub fn encode(record: &FilamentRecord) -> SpooltagResult<TagImage> {
    let mut image = TagImage::zeroed();

    put_string(
        image.block_mut(BLOCK_MATERIAL_IDS),
        0,
        8,
        &record.material_variant_id,
        "material_variant_id",
    )?;
    put_string(
        image.block_mut(BLOCK_MATERIAL_IDS),
        8,
        8,
        &record.material_id,
        "material_id",
    )?;
    put_string(
        image.block_mut(BLOCK_FILAMENT_TYPE),
        0,
        16,
        &record.filament_type,
        "filament_type",
    )?;
    put_string(
        image.block_mut(BLOCK_DETAILED_TYPE),
        0,
        16,
        &record.detailed_filament_type,
        "detailed_filament_type",
    )?;

    let color = image.block_mut(BLOCK_COLOR);
    color.0[..4].copy_from_slice(&record.color_rgba);
    write_u16_le(color, 4, record.spool_weight_g);
    write_f32_le(color, 8, record.filament_diameter_mm);

    let temps = image.block_mut(BLOCK_TEMPS);
    write_u16_le(temps, 0, record.drying_temp_c);
    write_u16_le(temps, 2, record.drying_time_h);
    write_u16_le(temps, 4, record.bed_temp_type);
    write_u16_le(temps, 6, record.bed_temp_c);
    write_u16_le(temps, 8, record.max_hotend_temp_c);
    write_u16_le(temps, 10, record.min_hotend_temp_c);

    let xcam = image.block_mut(BLOCK_XCAM);
    xcam.0[..12].copy_from_slice(&record.xcam_info);
    write_f32_le(xcam, 12, record.nozzle_diameter);

    put_string(
        image.block_mut(BLOCK_TRAY_UID),
        0,
        16,
        &record.tray_uid,
        "tray_uid",
    )?;

    let width_raw = record.spool_width_mm * 100.0;
    if !(0.0..=f32::from(u16::MAX)).contains(&width_raw) {
        return Err(SpooltagError::FieldOutOfRange {
            field: "spool_width_mm",
            reason: format!("{} mm does not fit a u16 at x100 scale", record.spool_width_mm),
        });
    }
    write_u16_le(
        image.block_mut(BLOCK_SPOOL_WIDTH),
        4,
        width_raw.round() as u16,
    );

    put_string(
        image.block_mut(BLOCK_PRODUCTION_DATETIME),
        0,
        16,
        &record.production_datetime,
        "production_datetime",
    )?;
    put_string(
        image.block_mut(BLOCK_SHORT_DATETIME),
        0,
        16,
        &record.short_production_datetime,
        "short_production_datetime",
    )?;
    write_u16_le(
        image.block_mut(BLOCK_FILAMENT_LENGTH),
        4,
        record.filament_length_m,
    );

    let info = image.block_mut(BLOCK_COLOR_INFO);
    write_u16_le(info, 0, record.color_format);
    write_u16_le(info, 2, record.color_count);
    if let Some(secondary) = record.secondary_color_abgr {
        info.0[4..8].copy_from_slice(&secondary);
    }

    Ok(image)
}

/// Overlay the payload blocks of `payload` onto `base`.
///
/// Block 0 and every sector trailer come from `base` untouched; use this
/// to combine encoded payload with a trailer/manufacturer template, or to
/// build a clone image from a source dump.
pub fn merge_payload(base: &TagImage, payload: &TagImage) -> TagImage {
    let mut out = base.clone();
    for addr in 0..TOTAL_BLOCKS {
        if is_payload_block(addr) {
            *out.block_mut(addr) = *payload.block(addr);
        }
    }
    out
}

fn put_string(
    block: &mut Block,
    offset: usize,
    width: usize,
    value: &str,
    field: &'static str,
) -> SpooltagResult<()> {
    if !value.is_ascii() {
        return Err(SpooltagError::FieldOutOfRange {
            field,
            reason: "must be ASCII".to_string(),
        });
    }
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(SpooltagError::FieldOutOfRange {
            field,
            reason: format!("{} bytes exceeds the {width}-byte slot", bytes.len()),
        });
    }
    block.0[offset..offset + bytes.len()].copy_from_slice(bytes);
    // Remainder of the slot stays NUL.
    Ok(())
}
