//! Core type definitions for fecmesh
//!
//! Identifiers and the entity types from the data model: file manifests,
//! local groups, shards, locations, replication tasks, and peer records.
//! Strongly typed records rather than loosely shaped maps; the loose
//! JSON shape is kept only at the wire/manifest boundary (see
//! `fecmesh-rpc::wire` and `FileManifest`'s `serde` impl).

use crate::time::Timestamp;
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// 128-bit identifier minted at chunking time for a file's manifest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct FileFingerprint(Uuid);

impl FileFingerprint {
    /// Mint a fresh, random fingerprint.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for FileFingerprint {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileFingerprint({})", self.0)
    }
}

impl fmt::Display for FileFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the node that owns a file (and, by extension, its
/// shards until they are distributed).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct OwnerId(Uuid);

impl OwnerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer identifier. The network accepts either a peer UUID or a
/// literal `host:port` pair and normalizes at the address-oracle
/// boundary (see design note in `SPEC_FULL.md` §9) rather than
/// rejecting one form.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[display("{_0}")]
pub struct PeerId(String);

impl PeerId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this identifier already looks like a `host:port` pair
    /// rather than an opaque peer UUID.
    #[must_use]
    pub fn looks_like_host_port(&self) -> bool {
        self.0.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

/// The kind of a shard, per the erasure layout: data, Reed-Solomon
/// parity, or a single-group LRC XOR-recovery shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKind {
    Data,
    Parity,
    LocalRecovery,
}

/// Lifecycle status of a locally stored shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Verified,
    Pending,
    Corrupted,
}

/// Lifecycle status of a `Location` claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Pending,
    Confirmed,
    Failed,
    Relocated,
}

/// Lifecycle status of a `ReplicationTask`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Reason a replication task was created. `PeerDisconnected` is the
/// only trigger the engine currently raises (§4.6); `Other` keeps the
/// type open for future triggers (e.g. proactive re-replication of an
/// at-risk chunk) without a breaking change to the table schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ReplicationReason {
    PeerDisconnected,
    Other(String),
}

impl fmt::Display for ReplicationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerDisconnected => write!(f, "peer_disconnected"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A contiguous partition of the `k` data-shard indices used for
/// cheap single-erasure LRC repair, plus the index of the XOR-recovery
/// shard computed over it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGroup {
    pub group_id: u16,
    pub shard_indices: Vec<u16>,
    pub local_recovery_index: u16,
}

/// The per-file descriptor containing every parameter needed to decode
/// and verify a chunked file. Created once at chunking time; the only
/// mutable field afterward is `expires_at`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileManifest {
    pub file_fingerprint: FileFingerprint,
    pub owner: OwnerId,
    /// Human-facing filename, distinct from the content-addressed
    /// fingerprint. Carried from the original `logical_name` field;
    /// never used for listing/browsing (a Non-goal), only stored.
    pub logical_name: Option<String>,
    /// Free-form labels the caller attached at chunking time.
    #[serde(default)]
    pub tags: Vec<String>,
    pub original_size: u64,
    #[serde(with = "hex_sha256")]
    pub original_sha256: [u8; 32],
    pub data_shards: u16,
    pub parity_shards: u16,
    pub chunk_size: u32,
    pub algorithm: String,
    pub local_groups: Vec<LocalGroup>,
    pub global_recovery_indices: Vec<u16>,
    #[serde(with = "chunk_hash_map")]
    pub chunk_hashes: HashMap<u16, [u8; 32]>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl FileManifest {
    /// Total shard count: `k + m + G` local-recovery shards.
    #[must_use]
    pub fn total_shards(&self) -> u16 {
        self.data_shards + self.parity_shards + self.local_groups.len() as u16
    }

    /// Minimum distinct shard indices in `[0, k+m)` required to
    /// reconstruct (invariant P2 in §3).
    #[must_use]
    pub fn required_for_reconstruction(&self) -> u16 {
        self.data_shards
    }
}

mod hex_sha256 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte hex digest"))
    }
}

mod chunk_hash_map {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &HashMap<u16, [u8; 32]>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let as_strings: HashMap<String, String> = value
            .iter()
            .map(|(k, v)| (k.to_string(), hex::encode(v)))
            .collect();
        as_strings.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<HashMap<u16, [u8; 32]>, D::Error> {
        let as_strings: HashMap<String, String> = HashMap::deserialize(d)?;
        as_strings
            .into_iter()
            .map(|(k, v)| {
                let index: u16 = k.parse().map_err(serde::de::Error::custom)?;
                let bytes = hex::decode(&v).map_err(serde::de::Error::custom)?;
                let digest: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32-byte hex digest"))?;
                Ok((index, digest))
            })
            .collect()
    }
}

/// `(file_fingerprint, shard_index, owner)` uniquely identifies a
/// shard row; `(..., peer_id)` uniquely identifies a location row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShardRecord {
    pub file_fingerprint: FileFingerprint,
    pub shard_index: u16,
    pub owner: OwnerId,
    pub local_path: String,
    #[serde(with = "hex_sha256")]
    pub sha256: [u8; 32],
    pub kind: ShardKind,
    pub size: u64,
    pub stored_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_accessed: Timestamp,
    pub status: ShardStatus,
}

/// A claim that a specific shard of a specific file is held by a
/// specific peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationRecord {
    pub file_fingerprint: FileFingerprint,
    pub shard_index: u16,
    pub owner: OwnerId,
    pub peer_id: PeerId,
    pub assigned_at: Timestamp,
    pub confirmed_at: Option<Timestamp>,
    pub status: LocationStatus,
    pub attempts: u32,
    pub failure_reason: Option<String>,
}

/// A unit of relocation work: move a shard off `source_peer` (who
/// dropped out, or who never confirmed) onto a fresh `target_peer`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationTask {
    pub id: Uuid,
    pub file_fingerprint: FileFingerprint,
    pub shard_index: u16,
    pub owner: OwnerId,
    pub source_peer: PeerId,
    pub target_peer: Option<PeerId>,
    pub reason: ReplicationReason,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub attempts: u32,
    pub status: ReplicationStatus,
    pub error: Option<String>,
}

/// One entry in the replication controller's "chunks at risk" report
/// (§4.6): a shard whose confirmed replica count has dropped to the
/// point of concern, or whose best hosting peer is no longer
/// trustworthy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkAtRisk {
    pub file_fingerprint: FileFingerprint,
    pub shard_index: u16,
    pub owner: OwnerId,
    pub replica_count: usize,
    pub min_reliability: f64,
}

/// What this node currently believes about a peer in the fleet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub host: String,
    pub port: u16,
    pub reliability: f64,
    pub shards_stored: u64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub online: bool,
    pub storage_available: Option<u64>,
}

impl PeerRecord {
    /// Reliability is always clamped to `[0, 1]` (§4.3).
    pub fn adjust_reliability(&mut self, delta: f64) {
        self.reliability = (self.reliability + delta).clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_clamps() {
        let mut peer = PeerRecord {
            peer_id: PeerId::new("p1"),
            host: "10.0.0.1".into(),
            port: 9000,
            reliability: 0.95,
            shards_stored: 0,
            first_seen: Timestamp::now(),
            last_seen: Timestamp::now(),
            online: true,
            storage_available: None,
        };
        peer.adjust_reliability(0.5);
        assert_eq!(peer.reliability, 1.0);
        peer.adjust_reliability(-2.0);
        assert_eq!(peer.reliability, 0.0);
    }

    #[test]
    fn peer_id_detects_host_port() {
        assert!(PeerId::new("10.0.0.5:9001").looks_like_host_port());
        assert!(!PeerId::new("a3f1c2b4-peer-uuid").looks_like_host_port());
    }

    #[test]
    fn manifest_shard_counts() {
        let manifest = FileManifest {
            file_fingerprint: FileFingerprint::new(),
            owner: OwnerId::new(),
            logical_name: Some("report.pdf".into()),
            tags: vec![],
            original_size: 13,
            original_sha256: [0u8; 32],
            data_shards: 4,
            parity_shards: 2,
            chunk_size: 4,
            algorithm: "reed-solomon+lrc".into(),
            local_groups: vec![
                LocalGroup {
                    group_id: 0,
                    shard_indices: vec![0, 1],
                    local_recovery_index: 6,
                },
                LocalGroup {
                    group_id: 1,
                    shard_indices: vec![2, 3],
                    local_recovery_index: 7,
                },
            ],
            global_recovery_indices: vec![4, 5],
            chunk_hashes: HashMap::new(),
            created_at: Timestamp::now(),
            expires_at: Timestamp::now(),
        };
        assert_eq!(manifest.total_shards(), 8);
        assert_eq!(manifest.required_for_reconstruction(), 4);
    }
}
