//! Hardware seam for tag readers.
//!
//! All methods are blocking: they wrap NFC controller calls that stall
//! until the radio responds. Callers must keep them off the async message
//! loop (see [`crate::service`]).

use spooltag_types::error::{SpooltagError, SpooltagResult};
use spooltag_types::tag::{Block, SectorKey, TagUid};

/// Which key slot of the sector trailer to authenticate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    A,
    B,
}

/// One tag currently coupled to the reader's field.
pub trait TagHandle: Send {
    /// Factory uid from the anticollision handshake.
    fn uid(&self) -> TagUid;

    /// Authenticate a sector; `false` means the key was rejected.
    fn authenticate(&mut self, sector: usize, key: &SectorKey, slot: KeySlot) -> bool;

    /// Read one block of an authenticated sector.
    fn read_block(&mut self, addr: usize) -> SpooltagResult<Block>;

    /// Write one block of an authenticated sector.
    fn write_block(&mut self, addr: usize, block: &Block) -> SpooltagResult<()>;

    /// Whether this tag accepts uid rewriting ("magic" tags).
    fn supports_uid_rewrite(&self) -> bool {
        false
    }

    /// Rewrite the factory uid on tags that support it.
    fn rewrite_uid(&mut self, _uid: &TagUid) -> SpooltagResult<()> {
        Err(SpooltagError::UnsupportedOperation(
            "uid rewriting is not supported by this tag".to_string(),
        ))
    }
}

/// A reader device that produces tags as they touch the field.
pub trait TagReader: Send {
    /// Block until a tag couples to the field.
    fn wait_for_tag(&mut self) -> SpooltagResult<Box<dyn TagHandle>>;
}
