//! fecmesh-common - Shared types and utilities
//!
//! Types, error definitions, configuration, and small utilities shared by
//! every fecmesh crate: the erasure codec, the chunk store, the metadata
//! index, the peer RPC transport, and the chunking/replication engine.

pub mod checksum;
pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use checksum::sha256_hex;
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
