//! Configuration types for fecmesh.
//!
//! Mirrors every key in the configuration table of §6: defaults are
//! compiled in here, then a node binary layers a TOML file, then
//! `FECMESH_*` environment variables, then CLI flags on top (see
//! `bin/fecmesh-node`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for a fecmesh node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub erasure: ErasureConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            erasure: ErasureConfig::default(),
            storage: StorageConfig::default(),
            network: NetworkConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

/// Node identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "fecmesh-node".to_string(),
            data_dir: PathBuf::from("./fecmesh-data"),
        }
    }
}

/// Erasure-coding parameters (§6: `RS_K`, `RS_M`, `LRC_GROUP_SIZE`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ErasureConfig {
    pub data_shards: u16,
    pub parity_shards: u16,
    pub lrc_group_size: u16,
    /// `CHUNK_SIZE_MB`: hint for splitting very large files before
    /// erasure coding. Files smaller than this are coded in one pass.
    pub chunk_size_mb: u32,
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            data_shards: 6,
            parity_shards: 4,
            lrc_group_size: 2,
            chunk_size_mb: 10,
        }
    }
}

impl ErasureConfig {
    /// `K + M`, validated to fit in GF(2^8) (`<= 255`).
    #[must_use]
    pub fn total_mds_shards(&self) -> u16 {
        self.data_shards + self.parity_shards
    }
}

/// Chunk store and retention configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// `RETENTION_DAYS`: shard lifetime after `stored_at`.
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./fecmesh-data/shards"),
            retention_days: 30,
        }
    }
}

/// Peer RPC transport configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen: String,
    /// `RPC_TIMEOUT_SECONDS`: base timeout before the adaptive formula
    /// in §4.4 adds a size-dependent term.
    pub rpc_timeout_seconds: u64,
    /// `MAX_CONNECTION_RETRIES`: transport-level connect retries.
    pub max_connection_retries: u32,
    /// `CONNECTION_RETRY_DELAY_SECONDS`: base backoff before doubling.
    pub connection_retry_delay_seconds: u64,
    /// `MAX_MESSAGE_SIZE`: max accepted frame, in bytes.
    pub max_message_size: usize,
    /// `MIN_RELIABILITY_SCORE`: peer-selection floor.
    pub min_reliability_score: f64,
    /// Max concurrent inbound connections the server accepts at once;
    /// additional accepts queue at the OS level (§4.4).
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9101".to_string(),
            rpc_timeout_seconds: 30,
            max_connection_retries: 3,
            connection_retry_delay_seconds: 5,
            max_message_size: 10 * 1024 * 1024,
            min_reliability_score: 0.5,
            max_connections: 256,
        }
    }
}

/// Replication controller and background scheduler configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// `MAX_RETRIES`: task-level retries before giving up.
    pub max_retries: u32,
    /// `BATCH_SIZE`: tasks drained per pass.
    pub batch_size: usize,
    /// `CLEANUP_INTERVAL_HOURS`: retention GC period.
    pub cleanup_interval_hours: u64,
    /// Period between metadata-integrity checks (§4.7: hourly).
    pub integrity_check_interval_hours: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            batch_size: 10,
            cleanup_interval_hours: 6,
            integrity_check_interval_hours: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.storage.retention_days, 30);
        assert_eq!(config.erasure.chunk_size_mb, 10);
        assert_eq!(config.erasure.data_shards, 6);
        assert_eq!(config.erasure.parity_shards, 4);
        assert_eq!(config.erasure.lrc_group_size, 2);
        assert_eq!(config.network.rpc_timeout_seconds, 30);
        assert_eq!(config.network.max_connection_retries, 3);
        assert_eq!(config.network.connection_retry_delay_seconds, 5);
        assert_eq!(config.network.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.network.min_reliability_score, 0.5);
        assert_eq!(config.replication.max_retries, 3);
        assert_eq!(config.replication.batch_size, 10);
        assert_eq!(config.replication.cleanup_interval_hours, 6);
    }

    #[test]
    fn total_mds_shards_is_k_plus_m() {
        let ec = ErasureConfig::default();
        assert_eq!(ec.total_mds_shards(), 10);
    }
}
