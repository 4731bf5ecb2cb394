//! Per-tag sector-key derivation.
//!
//! Every sector of a spool tag is protected by a unique 6-byte key derived
//! from the tag's factory uid with HKDF-SHA256: the 16-byte master secret
//! is the salt, the uid is the input keying material, and a short context
//! string is the info input. The output is expanded to 96 bytes and sliced
//! into 16 consecutive keys, one per sector in order.
//!
//! Derivation is deterministic, so the server and the hardware agent can
//! re-derive the same keys independently of any prior session.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use spooltag_types::config::KdfParams;
use spooltag_types::error::{SpooltagError, SpooltagResult};
use spooltag_types::tag::{KeySet, SectorKey, KEY_SIZE, NUM_SECTORS};

/// Derive the 16 sector keys for a tag uid.
///
/// The uid is typically 4 bytes but any non-empty input is accepted; an
/// empty uid fails with `InvalidInput` rather than deriving keys from
/// nothing.
pub fn derive_keys(params: &KdfParams, uid: &[u8]) -> SpooltagResult<KeySet> {
    if uid.is_empty() {
        return Err(SpooltagError::InvalidInput(
            "cannot derive sector keys from an empty uid".to_string(),
        ));
    }

    let hk = Hkdf::<Sha256>::new(Some(&params.master_secret), uid);
    let mut okm = [0u8; NUM_SECTORS * KEY_SIZE];
    hk.expand(&params.context, &mut okm)
        .map_err(|e| SpooltagError::InvalidInput(format!("HKDF expand failed: {e}")))?;

    let mut keys = Vec::with_capacity(NUM_SECTORS);
    for chunk in okm.chunks_exact(KEY_SIZE) {
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(chunk);
        keys.push(SectorKey::new(key));
    }
    okm.zeroize();

    KeySet::from_keys(keys)
}

/// Convenience wrapper over [`derive_keys`] for hex uids.
///
/// Accepts case-insensitive hex input and returns 16 uppercase hex keys in
/// sector order, the encoding carried on the wire.
pub fn derive_keys_hex(params: &KdfParams, uid_hex: &str) -> SpooltagResult<Vec<String>> {
    let uid = hex::decode(uid_hex.trim())
        .map_err(|e| SpooltagError::InvalidInput(format!("bad uid hex: {e}")))?;
    Ok(derive_keys(params, &uid)?.to_hex_list())
}
