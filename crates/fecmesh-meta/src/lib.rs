//! fecmesh-meta - embedded metadata index (C3)
//!
//! A single redb database tracking file manifests, shard records,
//! shard locations, replication tasks, and peer reliability, scoped to
//! one node (no distributed consensus: each peer is the sole writer of
//! its own index).

pub mod store;
pub mod tables;

pub use store::MetaIndex;
