//! MIFARE Classic 1K tag primitives.
//!
//! Geometry: 16 sectors × 4 blocks × 16 bytes = 1024 bytes. Block 0 holds
//! the factory uid and manufacturer data and is never user-writable. The
//! last block of every sector (address ≡ 3 mod 4) is the sector trailer
//! holding key material and access bits, never payload data.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{SpooltagError, SpooltagResult};

/// Number of sectors on a 1K tag.
pub const NUM_SECTORS: usize = 16;
/// Blocks per sector.
pub const BLOCKS_PER_SECTOR: usize = 4;
/// Bytes per block.
pub const BLOCK_SIZE: usize = 16;
/// Total blocks on the tag.
pub const TOTAL_BLOCKS: usize = NUM_SECTORS * BLOCKS_PER_SECTOR;
/// Total bytes on the tag.
pub const TOTAL_BYTES: usize = TOTAL_BLOCKS * BLOCK_SIZE;
/// Length of a sector key in bytes.
pub const KEY_SIZE: usize = 6;
/// Length of the factory uid in bytes.
pub const UID_SIZE: usize = 4;

/// First block address of a sector.
pub fn sector_first_block(sector: usize) -> usize {
    sector * BLOCKS_PER_SECTOR
}

/// Sector containing a block address.
pub fn block_sector(block: usize) -> usize {
    block / BLOCKS_PER_SECTOR
}

/// Whether a block address is a sector trailer.
pub fn is_sector_trailer(block: usize) -> bool {
    block % BLOCKS_PER_SECTOR == BLOCKS_PER_SECTOR - 1
}

/// Trailer block address for a sector.
pub fn sector_trailer_block(sector: usize) -> usize {
    sector_first_block(sector) + BLOCKS_PER_SECTOR - 1
}

/// Data (non-trailer) block addresses of a sector.
pub fn sector_data_blocks(sector: usize) -> [usize; BLOCKS_PER_SECTOR - 1] {
    let first = sector_first_block(sector);
    [first, first + 1, first + 2]
}

/// Whether a block address may carry write payload: block 0 and sector
/// trailers are excluded.
pub fn is_payload_block(block: usize) -> bool {
    block != 0 && !is_sector_trailer(block)
}

/// The 4-byte factory uid read from block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagUid([u8; UID_SIZE]);

impl TagUid {
    pub const fn new(bytes: [u8; UID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from an 8-char hex string (case-insensitive).
    pub fn from_hex(s: &str) -> SpooltagResult<Self> {
        let bytes: [u8; UID_SIZE] = hex::decode(s.trim())
            .map_err(|e| SpooltagError::InvalidInput(format!("bad uid hex: {e}")))?
            .try_into()
            .map_err(|_| {
                SpooltagError::InvalidInput(format!("uid must be {UID_SIZE} bytes"))
            })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; UID_SIZE] {
        &self.0
    }

    /// Uppercase hex form used on the wire (8 chars).
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl std::fmt::Display for TagUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for TagUid {
    type Err = SpooltagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TagUid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TagUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A single 6-byte sector key.
///
/// SECURITY: key bytes are zeroized on drop and never appear in Debug or
/// log output; use [`SectorKey::to_hex`] explicitly where the wire needs
/// the raw form.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SectorKey([u8; KEY_SIZE]);

impl SectorKey {
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a 12-char hex string (case-insensitive).
    pub fn from_hex(s: &str) -> SpooltagResult<Self> {
        let bytes: [u8; KEY_SIZE] = hex::decode(s.trim())
            .map_err(|e| SpooltagError::InvalidInput(format!("bad key hex: {e}")))?
            .try_into()
            .map_err(|_| {
                SpooltagError::InvalidInput(format!("sector key must be {KEY_SIZE} bytes"))
            })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Uppercase hex form used on the wire (12 chars).
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl std::fmt::Debug for SectorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SectorKey(<redacted>)")
    }
}

/// An ordered set of exactly one key per sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet([SectorKey; NUM_SECTORS]);

impl KeySet {
    pub fn new(keys: [SectorKey; NUM_SECTORS]) -> Self {
        Self(keys)
    }

    /// Build from a vector, which must hold exactly 16 keys.
    pub fn from_keys(keys: Vec<SectorKey>) -> SpooltagResult<Self> {
        let len = keys.len();
        let keys: [SectorKey; NUM_SECTORS] = keys.try_into().map_err(|_| {
            SpooltagError::InvalidInput(format!("expected {NUM_SECTORS} keys, got {len}"))
        })?;
        Ok(Self(keys))
    }

    /// Parse from 16 hex strings as carried on the wire.
    pub fn from_hex_list(keys: &[String]) -> SpooltagResult<Self> {
        let keys = keys
            .iter()
            .map(|k| SectorKey::from_hex(k))
            .collect::<SpooltagResult<Vec<_>>>()?;
        Self::from_keys(keys)
    }

    pub fn key(&self, sector: usize) -> &SectorKey {
        &self.0[sector]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectorKey> {
        self.0.iter()
    }

    /// Wire form: 16 uppercase hex strings.
    pub fn to_hex_list(&self) -> Vec<String> {
        self.0.iter().map(SectorKey::to_hex).collect()
    }
}

/// A single 16-byte tag block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block(pub [u8; BLOCK_SIZE]);

impl Block {
    pub const ZERO: Block = Block([0; BLOCK_SIZE]);

    pub fn from_slice(bytes: &[u8]) -> SpooltagResult<Self> {
        let bytes: [u8; BLOCK_SIZE] = bytes.try_into().map_err(|_| {
            SpooltagError::MalformedImage(format!(
                "block must be {BLOCK_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::ZERO
    }
}

/// A complete 64-block tag image (1024 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagImage([Block; TOTAL_BLOCKS]);

impl TagImage {
    /// An all-zero image.
    pub fn zeroed() -> Self {
        Self([Block::ZERO; TOTAL_BLOCKS])
    }

    /// Build from exactly 64 blocks.
    pub fn from_blocks(blocks: Vec<Block>) -> SpooltagResult<Self> {
        let len = blocks.len();
        let blocks: [Block; TOTAL_BLOCKS] = blocks.try_into().map_err(|_| {
            SpooltagError::MalformedImage(format!("expected {TOTAL_BLOCKS} blocks, got {len}"))
        })?;
        Ok(Self(blocks))
    }

    /// Build from a raw 1024-byte dump.
    pub fn from_bytes(data: &[u8]) -> SpooltagResult<Self> {
        if data.len() != TOTAL_BYTES {
            return Err(SpooltagError::MalformedImage(format!(
                "expected {TOTAL_BYTES} bytes, got {}",
                data.len()
            )));
        }
        let blocks = data
            .chunks_exact(BLOCK_SIZE)
            .map(Block::from_slice)
            .collect::<SpooltagResult<Vec<_>>>()?;
        Self::from_blocks(blocks)
    }

    pub fn block(&self, addr: usize) -> &Block {
        &self.0[addr]
    }

    pub fn block_mut(&mut self, addr: usize) -> &mut Block {
        &mut self.0[addr]
    }

    pub fn blocks(&self) -> &[Block; TOTAL_BLOCKS] {
        &self.0
    }

    /// Flatten into a raw 1024-byte dump.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TOTAL_BYTES);
        for b in &self.0 {
            out.extend_from_slice(b.as_bytes());
        }
        out
    }

    /// The factory uid from block 0.
    pub fn uid(&self) -> TagUid {
        let b = self.0[0].as_bytes();
        TagUid::new([b[0], b[1], b[2], b[3]])
    }

    /// Whether every block of a sector is zero.
    pub fn sector_is_zero(&self, sector: usize) -> bool {
        let first = sector_first_block(sector);
        self.0[first..first + BLOCKS_PER_SECTOR]
            .iter()
            .all(Block::is_zero)
    }
}

/// Per-sector readability bitmask carried alongside a read image.
///
/// Bit N set means sector N authenticated and was actually read. An
/// all-zero sector whose bit is clear was unreadable, not intentionally
/// zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectorMask(u16);

impl SectorMask {
    /// All 16 sectors readable.
    pub const ALL: SectorMask = SectorMask(0xFFFF);
    /// No sector readable.
    pub const NONE: SectorMask = SectorMask(0);

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn set_readable(&mut self, sector: usize, readable: bool) {
        if readable {
            self.0 |= 1 << sector;
        } else {
            self.0 &= !(1 << sector);
        }
    }

    pub fn is_readable(&self, sector: usize) -> bool {
        self.0 & (1 << sector) != 0
    }

    /// Sectors that could not be read.
    pub fn unreadable_sectors(&self) -> Vec<usize> {
        (0..NUM_SECTORS).filter(|&s| !self.is_readable(s)).collect()
    }
}

impl Default for SectorMask {
    fn default() -> Self {
        Self::ALL
    }
}
