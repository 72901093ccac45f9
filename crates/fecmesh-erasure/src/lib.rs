//! fecmesh-erasure - Reed-Solomon + Local Reconstruction Code erasure codec
//!
//! Implements the RS(k, m) + LRC scheme of §4.1: `k` data shards and `m`
//! Reed-Solomon parity shards over GF(2^8) (via `reed-solomon-simd`),
//! plus one XOR-recovery shard per contiguous local group of data
//! shards for cheap single-erasure repair without touching parity.
//!
//! # Example
//!
//! ```
//! use fecmesh_common::config::ErasureConfig;
//! use fecmesh_erasure::ErasureCodec;
//!
//! let codec = ErasureCodec::new(ErasureConfig { data_shards: 4, parity_shards: 2, lrc_group_size: 2, chunk_size_mb: 10 }).unwrap();
//! let encoded = codec.encode(b"Hello, world!").unwrap();
//! assert_eq!(encoded.shards.len(), 4 + 2 + 2);
//! ```

pub mod codec;
pub mod groups;

pub use codec::{DecodeInput, EncodedShards, ErasureCodec, ErasureError};
pub use groups::build_local_groups;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{DecodeInput, EncodedShards, ErasureCodec, ErasureError};
}
