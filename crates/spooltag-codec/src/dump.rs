//! Tag dump ingestion.
//!
//! Accepts the formats dumps show up in offline: raw 1024-byte binary,
//! whitespace-tolerant hex, base64, per-block hex or base64 lists, and
//! Proxmark3 text dumps. Every failure is `MalformedImage`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use spooltag_types::error::{SpooltagError, SpooltagResult};
use spooltag_types::tag::{Block, TagImage, TOTAL_BLOCKS, TOTAL_BYTES};

/// Parse a raw 1024-byte binary dump.
pub fn from_binary(data: &[u8]) -> SpooltagResult<TagImage> {
    TagImage::from_bytes(data)
}

/// Parse a hex dump (2048 hex chars); spaces and newlines are ignored.
pub fn from_hex(text: &str) -> SpooltagResult<TagImage> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let data = hex::decode(&clean)
        .map_err(|e| SpooltagError::MalformedImage(format!("bad hex dump: {e}")))?;
    TagImage::from_bytes(&data)
}

/// Parse a base64-encoded 1024-byte dump.
pub fn from_base64(text: &str) -> SpooltagResult<TagImage> {
    let data = BASE64
        .decode(text.trim())
        .map_err(|e| SpooltagError::MalformedImage(format!("bad base64 dump: {e}")))?;
    TagImage::from_bytes(&data)
}

/// Parse a list of 64 base64-encoded blocks, the wire encoding.
pub fn from_base64_blocks(blocks: &[String]) -> SpooltagResult<TagImage> {
    let blocks = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let bytes = BASE64.decode(b.trim()).map_err(|e| {
                SpooltagError::MalformedImage(format!("block {i}: bad base64: {e}"))
            })?;
            Block::from_slice(&bytes)
        })
        .collect::<SpooltagResult<Vec<_>>>()?;
    TagImage::from_blocks(blocks)
}

/// Parse a list of 64 hex-encoded blocks.
pub fn from_hex_blocks(blocks: &[String]) -> SpooltagResult<TagImage> {
    let blocks = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let bytes = hex::decode(b.trim())
                .map_err(|e| SpooltagError::MalformedImage(format!("block {i}: bad hex: {e}")))?;
            Block::from_slice(&bytes)
        })
        .collect::<SpooltagResult<Vec<_>>>()?;
    TagImage::from_blocks(blocks)
}

/// Parse a Proxmark3 text dump: one block per line, `Block NN: xx xx ...`
/// or bare hex lines; blank lines and `#` comments are ignored.
pub fn from_proxmark3(text: &str) -> SpooltagResult<TagImage> {
    let mut blocks = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let hex_part = match line.split_once(':') {
            Some((_, rest)) => rest,
            None => line,
        };
        let clean: String = hex_part.chars().filter(|c| !c.is_whitespace()).collect();
        if clean.len() == 32 {
            let bytes = hex::decode(&clean)
                .map_err(|e| SpooltagError::MalformedImage(format!("bad dump line: {e}")))?;
            blocks.push(Block::from_slice(&bytes)?);
        }
    }
    if blocks.len() != TOTAL_BLOCKS {
        return Err(SpooltagError::MalformedImage(format!(
            "dump should have {TOTAL_BLOCKS} blocks, found {}",
            blocks.len()
        )));
    }
    TagImage::from_blocks(blocks)
}

/// Parse a dump file of unknown format.
///
/// Exactly 1024 bytes is taken as raw binary; otherwise the content is
/// treated as text and tried as Proxmark3, plain hex, then base64.
pub fn from_file_contents(data: &[u8]) -> SpooltagResult<TagImage> {
    if data.len() == TOTAL_BYTES {
        return from_binary(data);
    }
    let text = std::str::from_utf8(data).map_err(|_| {
        SpooltagError::MalformedImage(format!(
            "dump is neither {TOTAL_BYTES} raw bytes nor text",
        ))
    })?;
    if text.lines().any(|l| l.contains(':')) {
        return from_proxmark3(text);
    }
    from_hex(text).or_else(|_| from_base64(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> Vec<u8> {
        let mut data = vec![0u8; TOTAL_BYTES];
        data[0..4].copy_from_slice(&[0x7A, 0xD4, 0x3F, 0x1C]);
        data[5 * 16] = 0xAA;
        data
    }

    #[test]
    fn test_binary() {
        let image = from_binary(&sample_bytes()).unwrap();
        assert_eq!(image.uid().to_hex(), "7AD43F1C");
        assert!(from_binary(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_hex_with_whitespace() {
        let hex_text = sample_bytes()
            .chunks(16)
            .map(hex::encode)
            .collect::<Vec<_>>()
            .join("\n");
        let image = from_hex(&hex_text).unwrap();
        assert_eq!(image.uid().to_hex(), "7AD43F1C");
        assert_eq!(image.block(5).as_bytes()[0], 0xAA);
    }

    #[test]
    fn test_base64_blocks() {
        let blocks: Vec<String> = sample_bytes()
            .chunks(16)
            .map(|c| BASE64.encode(c))
            .collect();
        let image = from_base64_blocks(&blocks).unwrap();
        assert_eq!(image.uid().to_hex(), "7AD43F1C");
        assert!(from_base64_blocks(&blocks[..63]).is_err());
        assert!(from_base64_blocks(&vec!["AAAA".to_string(); 64]).is_err());
    }

    #[test]
    fn test_proxmark3() {
        let mut text = String::from("# pm3 dump\n");
        for (i, chunk) in sample_bytes().chunks(16).enumerate() {
            let spaced = chunk
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ");
            text.push_str(&format!("Block {i:02}: {spaced}\n"));
        }
        let image = from_proxmark3(&text).unwrap();
        assert_eq!(image.uid().to_hex(), "7AD43F1C");

        let truncated: String = text.lines().take(40).collect::<Vec<_>>().join("\n");
        assert!(from_proxmark3(&truncated).is_err());
    }

    #[test]
    fn test_from_file_contents_detection() {
        let raw = sample_bytes();
        assert!(from_file_contents(&raw).is_ok());

        let hex_text = hex::encode(&raw);
        assert!(from_file_contents(hex_text.as_bytes()).is_ok());

        let b64_text = BASE64.encode(&raw);
        assert!(from_file_contents(b64_text.as_bytes()).is_ok());

        assert!(from_file_contents(b"garbage").is_err());
    }
}
