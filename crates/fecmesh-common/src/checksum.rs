//! Hashing utilities.
//!
//! The engine only ever needs one digest algorithm (SHA-256, per §3/§4):
//! whole-file integrity, per-shard integrity, and the wire protocol's
//! `content_hash` field all use it. Kept as a thin module, with both
//! one-shot and streaming entry points, rather than a multi-algorithm
//! checksum type that also carries CRC32C/xxHash for raw-block
//! scrubbing fecmesh has no use for.

use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// Compute the SHA-256 digest of an in-memory buffer.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compute the SHA-256 digest of an in-memory buffer, hex-encoded.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Stream-read `reader` once, computing its SHA-256 digest without
/// buffering the whole content (per C2's `hash`/`verify` guarantee of
/// a single streamed read).
pub fn sha256_stream(mut reader: impl Read) -> io::Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Verify `reader`'s content against an expected digest, streaming.
pub fn verify_stream(reader: impl Read, expected: &[u8; 32]) -> io::Result<bool> {
    Ok(&sha256_stream(reader)? == expected)
}
