//! Sector-by-sector execution of read and write operations.
//!
//! Reads never abort for a single bad sector: every candidate key is
//! tried and, on total failure, the sector degrades to zero fill with its
//! readability bit cleared. Writes skip unauthenticated sectors and
//! report a partial block count instead of failing outright.

use tracing::{debug, warn};

use spooltag_types::error::{SpooltagError, SpooltagResult};
use spooltag_types::tag::{
    is_payload_block, sector_first_block, Block, KeySet, SectorKey, SectorMask, TagImage,
    TagUid, BLOCKS_PER_SECTOR, NUM_SECTORS,
};

use crate::hardware::{KeySlot, TagHandle};

/// A full 64-block read plus which sectors actually authenticated.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub image: TagImage,
    pub readable: SectorMask,
}

/// Outcome of a write pass.
#[derive(Debug, Clone)]
pub struct WriteReport {
    /// Payload blocks actually written.
    pub blocks_written: u32,
    /// Sectors skipped because no candidate key authenticated.
    pub skipped_sectors: Vec<usize>,
}

/// Authenticate a sector with the supplied key (slot A, then B), falling
/// back to the configured well-known keys.
fn authenticate_sector(
    tag: &mut dyn TagHandle,
    sector: usize,
    key: &SectorKey,
    fallback: &[SectorKey],
) -> bool {
    if tag.authenticate(sector, key, KeySlot::A) || tag.authenticate(sector, key, KeySlot::B) {
        return true;
    }
    for candidate in fallback {
        if tag.authenticate(sector, candidate, KeySlot::A)
            || tag.authenticate(sector, candidate, KeySlot::B)
        {
            debug!(sector, "Sector authenticated with a fallback key");
            return true;
        }
    }
    false
}

/// Read all 64 blocks of the coupled tag.
///
/// Always returns a complete image: sectors where every candidate key
/// failed (or a block read errored mid-sector) are zero-filled and
/// flagged unreadable in the mask.
pub fn read_tag(tag: &mut dyn TagHandle, keys: &KeySet, fallback: &[SectorKey]) -> ReadResult {
    let mut image = TagImage::zeroed();
    let mut readable = SectorMask::ALL;

    for sector in 0..NUM_SECTORS {
        if !authenticate_sector(tag, sector, keys.key(sector), fallback) {
            warn!(sector, "Authentication failed, zero-filling sector");
            readable.set_readable(sector, false);
            continue;
        }

        let first = sector_first_block(sector);
        let mut blocks = [Block::ZERO; BLOCKS_PER_SECTOR];
        let mut ok = true;
        for (i, slot) in blocks.iter_mut().enumerate() {
            match tag.read_block(first + i) {
                Ok(block) => *slot = block,
                Err(e) => {
                    warn!(sector, block = first + i, error = %e, "Block read failed");
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            readable.set_readable(sector, false);
            continue;
        }
        for (i, block) in blocks.into_iter().enumerate() {
            *image.block_mut(first + i) = block;
        }
    }

    ReadResult { image, readable }
}

/// Write the payload blocks of `image` onto the coupled tag.
///
/// Block 0 and sector trailers are never written. If `target_uid` is set
/// the tag must support uid rewriting; otherwise the whole write fails
/// with `UnsupportedOperation` rather than silently dropping the field.
pub fn write_tag(
    tag: &mut dyn TagHandle,
    keys: &KeySet,
    image: &TagImage,
    fallback: &[SectorKey],
    target_uid: Option<&TagUid>,
) -> SpooltagResult<WriteReport> {
    if let Some(uid) = target_uid {
        if !tag.supports_uid_rewrite() {
            return Err(SpooltagError::UnsupportedOperation(
                "uid rewriting is not supported by this tag".to_string(),
            ));
        }
        tag.rewrite_uid(uid)?;
    }

    let mut blocks_written = 0u32;
    let mut skipped_sectors = Vec::new();

    for sector in 0..NUM_SECTORS {
        if !authenticate_sector(tag, sector, keys.key(sector), fallback) {
            warn!(sector, "Authentication failed, skipping sector");
            skipped_sectors.push(sector);
            continue;
        }

        for addr in sector_first_block(sector)..sector_first_block(sector) + BLOCKS_PER_SECTOR {
            if !is_payload_block(addr) {
                continue;
            }
            match tag.write_block(addr, image.block(addr)) {
                Ok(()) => blocks_written += 1,
                Err(e) => warn!(sector, block = addr, error = %e, "Block write failed"),
            }
        }
    }

    Ok(WriteReport {
        blocks_written,
        skipped_sectors,
    })
}
