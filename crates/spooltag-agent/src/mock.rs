//! In-memory tag for executor and service tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use spooltag_types::error::{SpooltagError, SpooltagResult};
use spooltag_types::tag::{block_sector, Block, KeySet, SectorKey, TagImage, TagUid};

use crate::hardware::{KeySlot, TagHandle, TagReader};

struct Inner {
    uid: TagUid,
    image: TagImage,
    keys: KeySet,
    failing_sectors: HashSet<usize>,
    authenticated: HashSet<usize>,
    supports_uid_rewrite: bool,
    rewritten_uid: Option<TagUid>,
}

/// A synthetic tag; clones share state so tests can inspect writes.
#[derive(Clone)]
pub struct MockTag {
    inner: Arc<Mutex<Inner>>,
}

impl MockTag {
    pub fn new(uid: TagUid, image: TagImage, keys: KeySet) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                uid,
                image,
                keys,
                failing_sectors: HashSet::new(),
                authenticated: HashSet::new(),
                supports_uid_rewrite: false,
                rewritten_uid: None,
            })),
        }
    }

    /// Make a sector reject every key.
    pub fn fail_sector(&mut self, sector: usize) {
        self.inner.lock().unwrap().failing_sectors.insert(sector);
    }

    pub fn with_uid_rewrite(self) -> Self {
        self.inner.lock().unwrap().supports_uid_rewrite = true;
        self
    }

    pub fn stored_image(&self) -> TagImage {
        self.inner.lock().unwrap().image.clone()
    }

    pub fn rewritten_uid(&self) -> Option<TagUid> {
        self.inner.lock().unwrap().rewritten_uid
    }
}

impl TagHandle for MockTag {
    fn uid(&self) -> TagUid {
        self.inner.lock().unwrap().uid
    }

    fn authenticate(&mut self, sector: usize, key: &SectorKey, _slot: KeySlot) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_sectors.contains(&sector) {
            return false;
        }
        if key == inner.keys.key(sector) {
            inner.authenticated.insert(sector);
            true
        } else {
            false
        }
    }

    fn read_block(&mut self, addr: usize) -> SpooltagResult<Block> {
        let inner = self.inner.lock().unwrap();
        if !inner.authenticated.contains(&block_sector(addr)) {
            return Err(SpooltagError::AuthenticationFailed(block_sector(addr) as u8));
        }
        Ok(*inner.image.block(addr))
    }

    fn write_block(&mut self, addr: usize, block: &Block) -> SpooltagResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.authenticated.contains(&block_sector(addr)) {
            return Err(SpooltagError::AuthenticationFailed(block_sector(addr) as u8));
        }
        *inner.image.block_mut(addr) = *block;
        Ok(())
    }

    fn supports_uid_rewrite(&self) -> bool {
        self.inner.lock().unwrap().supports_uid_rewrite
    }

    fn rewrite_uid(&mut self, uid: &TagUid) -> SpooltagResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.supports_uid_rewrite {
            return Err(SpooltagError::UnsupportedOperation(
                "uid rewriting is not supported by this tag".to_string(),
            ));
        }
        inner.rewritten_uid = Some(*uid);
        inner.uid = *uid;
        Ok(())
    }
}

/// Reader that hands out the same shared tag on every touch.
pub struct MockReader {
    pub tag: MockTag,
}

impl TagReader for MockReader {
    fn wait_for_tag(&mut self) -> SpooltagResult<Box<dyn TagHandle>> {
        Ok(Box::new(self.tag.clone()))
    }
}
