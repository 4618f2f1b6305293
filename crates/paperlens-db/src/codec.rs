//! Versioned binary encoding for stored vectors.
//!
//! Layout (little-endian):
//!
//! | bytes | content |
//! |---|---|
//! | 0..3 | magic `PLV` |
//! | 3 | schema version |
//! | 4..8 | element count (`u32`) |
//! | 8.. | `count` × `f32` |
//!
//! Stored inside JSON records as standard base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{DbError, Result};

const MAGIC: &[u8; 3] = b"PLV";
pub const CODEC_VERSION: u8 = 1;
const HEADER_LEN: usize = 8;

pub fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + values.len() * 4);
    out.extend_from_slice(MAGIC);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() < HEADER_LEN {
        return Err(DbError::Codec(format!("truncated header ({} bytes)", bytes.len())));
    }
    if &bytes[0..3] != MAGIC {
        return Err(DbError::Codec("bad magic".to_string()));
    }
    let version = bytes[3];
    if version != CODEC_VERSION {
        return Err(DbError::Codec(format!("unsupported version {}", version)));
    }
    let count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != count * 4 {
        return Err(DbError::Codec(format!(
            "expected {} values, payload holds {} bytes",
            count,
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn encode_to_string(values: &[f32]) -> String {
    STANDARD.encode(encode_vector(values))
}

pub fn decode_from_str(encoded: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| DbError::Codec(format!("base64: {}", e)))?;
    decode_vector(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = encode_vector(&[1.0, -2.5]);
        assert_eq!(&bytes[0..3], b"PLV");
        assert_eq!(bytes[3], CODEC_VERSION);
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..12], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_string_roundtrip_preserves_values() {
        let values = vec![0.25f32, -1.0, 3.5e-8, f32::MAX];
        assert_eq!(decode_from_str(&encode_to_string(&values)).unwrap(), values);
        assert!(decode_from_str(&encode_to_string(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut bytes = encode_vector(&[1.0]);
        bytes[3] = 9;
        assert!(matches!(decode_vector(&bytes), Err(DbError::Codec(_))));
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let mut bytes = encode_vector(&[1.0, 2.0]);
        bytes.truncate(bytes.len() - 1);
        assert!(decode_vector(&bytes).is_err());
        assert!(decode_vector(b"PL").is_err());
        assert!(decode_from_str("not base64!!").is_err());
    }
}
