//! fecmesh-store - content-addressed chunk store (C2)
//!
//! Stores erasure-coded shard bytes on the local filesystem under
//! `<root>/<owner>/<file>/<index>.shard`. Writes are atomic
//! (temp-file-then-rename), reads stream straight off disk, and
//! integrity checks reuse `fecmesh_common::checksum`.

pub mod layout;
pub mod store;

pub use layout::ChunkLayout;
pub use store::{ChunkStore, StoreStats, StoreStatsSnapshot};
