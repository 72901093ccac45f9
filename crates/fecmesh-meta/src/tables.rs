//! redb table definitions for the metadata index.
//!
//! Every table is `&str -> &str`, JSON-encoded values. Composite keys
//! use a `\x00`-joined prefix scheme so a single `range()` call
//! answers "everything for this file" or "everything for this shard"
//! without a secondary index.

use redb::TableDefinition;

/// `file_fingerprint` -> JSON(`FileManifest`)
pub const MANIFESTS: TableDefinition<&str, &str> = TableDefinition::new("manifests");

/// `"{file}\x00{index:05}"` -> JSON(`ShardRecord`)
pub const SHARDS: TableDefinition<&str, &str> = TableDefinition::new("shards");

/// `"{file}\x00{index:05}\x00{peer}"` -> JSON(`LocationRecord`)
pub const LOCATIONS: TableDefinition<&str, &str> = TableDefinition::new("locations");

/// `task_id` (uuid) -> JSON(`ReplicationTask`)
pub const REPLICATION_TASKS: TableDefinition<&str, &str> = TableDefinition::new("replication_tasks");

/// `peer_id` -> JSON(`PeerRecord`)
pub const PEERS: TableDefinition<&str, &str> = TableDefinition::new("peers");

/// Build the `"{file}\x00{index:05}"` shard key.
#[must_use]
pub fn shard_key(file: &str, index: u16) -> String {
    format!("{file}\x00{index:05}")
}

/// Build the `"{file}\x00{index:05}\x00{peer}"` location key.
#[must_use]
pub fn location_key(file: &str, index: u16, peer: &str) -> String {
    format!("{file}\x00{index:05}\x00{peer}")
}

/// Prefix that matches every shard (or location) row for `file`.
#[must_use]
pub fn file_prefix(file: &str) -> String {
    format!("{file}\x00")
}

/// Prefix that matches every location row for one shard of `file`.
#[must_use]
pub fn shard_prefix(file: &str, index: u16) -> String {
    format!("{file}\x00{index:05}\x00")
}
