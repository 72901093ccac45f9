//! Base64 helpers for the `chunk_b64` wire field (§4.4). Kept in one
//! place so every caller uses the same engine/alphabet.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fecmesh_common::{Error, Result};

#[must_use]
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode(s: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| Error::Decoding(format!("invalid base64: {e}")))
}
