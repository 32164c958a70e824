//! Text encodings for binary buffers in persisted snapshots.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::buffers::BufferError;

/// Encoding tag stored next to each snapshot buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferEncoding {
    Base64,
    Hex,
}

impl BufferEncoding {
    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            BufferEncoding::Base64 => STANDARD.encode(bytes),
            BufferEncoding::Hex => to_hex(bytes),
        }
    }

    pub fn decode(self, data: &str) -> Result<Bytes, BufferError> {
        match self {
            BufferEncoding::Base64 => STANDARD
                .decode(data)
                .map(Bytes::from)
                .map_err(|_| BufferError::InvalidEncoding { encoding: "base64" }),
            BufferEncoding::Hex => from_hex(data).map(Bytes::from),
        }
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

pub fn from_hex(s: &str) -> Result<Vec<u8>, BufferError> {
    let invalid = || BufferError::InvalidEncoding { encoding: "hex" };
    if s.len() % 2 != 0 {
        return Err(invalid());
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for i in (0..bytes.len()).step_by(2) {
        let hi = (bytes[i] as char).to_digit(16).ok_or_else(invalid)? as u8;
        let lo = (bytes[i + 1] as char).to_digit(16).ok_or_else(invalid)? as u8;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}
