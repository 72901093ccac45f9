//! Chunking orchestrator (C5): split a file into erasure-coded shards,
//! disperse them to peers, and reconstruct from whatever subset
//! survives (§4.5).
//!
//! Grounded in `original_source/chunking/chunking_mgr.py`'s
//! `ChunkingManager` (`chunk_file`/`distribute_chunks`/
//! `reconstruct_file`/`delete_file`/`get_file_status`), reimplemented
//! with typed errors and `tracing::instrument` in place of dict-shaped
//! returns and `logging` calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use fecmesh_common::config::Config;
use fecmesh_common::{
    sha256_hex, time::now, Error, FileFingerprint, FileManifest, LocationRecord, LocationStatus,
    OwnerId, PeerId, Result, ShardKind, ShardRecord, ShardStatus,
};
use fecmesh_erasure::{DecodeInput, ErasureCodec};
use fecmesh_meta::MetaIndex;
use fecmesh_rpc::methods::{DeleteChunkRequest, GetChunkRequest, StoreChunkRequest};
use fecmesh_rpc::RpcClient;
use fecmesh_store::ChunkStore;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::b64;
use crate::selection;

/// Outcome of a `distribute_chunks` pass.
#[derive(Debug, Clone, Default)]
pub struct DistributionReport {
    pub file_fingerprint: Option<FileFingerprint>,
    pub assigned: usize,
    pub confirmed: usize,
    pub failed: Vec<(u16, String)>,
    /// How many local shard copies were dropped after a peer confirmed
    /// receipt (only nonzero when `delete_local_after_confirm` is set).
    pub local_deleted: usize,
}

/// Read-only summary of a file's chunking/distribution state, per
/// `chunking_mgr.py::get_file_status`. Pure read-side convenience (not
/// the human-browsing surface the Non-goals exclude): built entirely
/// from rows the other operations already maintain.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStatus {
    pub chunked: bool,
    pub distributed: bool,
    pub reconstructable: bool,
    pub distribution_pct: f64,
}

/// Splits files into shards, disperses them to peers, and reconstructs
/// from whatever subset survives.
pub struct ChunkingOrchestrator {
    config: Config,
    store: ChunkStore,
    meta: Arc<MetaIndex>,
    codec: ErasureCodec,
    rpc: Arc<RpcClient>,
    /// Files with a distribution currently in flight (invariant P4:
    /// at most one `distribute_chunks` per file at a time).
    in_flight: Mutex<HashSet<FileFingerprint>>,
}

impl ChunkingOrchestrator {
    pub fn new(
        config: Config,
        store: ChunkStore,
        meta: Arc<MetaIndex>,
        rpc: Arc<RpcClient>,
    ) -> Result<Self> {
        let codec = ErasureCodec::new(config.erasure).map_err(Error::from)?;
        Ok(Self {
            config,
            store,
            meta,
            codec,
            rpc,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Encode `data` as `k` data + `m` parity + `G` local-recovery
    /// shards, write them locally, and commit the manifest and shard
    /// rows in one metadata transaction (§4.5: no partial manifest is
    /// ever observable).
    #[instrument(skip(self, data), fields(owner = %owner, bytes = data.len()))]
    pub async fn chunk_file(
        &self,
        owner: OwnerId,
        logical_name: Option<String>,
        tags: Vec<String>,
        data: &[u8],
    ) -> Result<FileManifest> {
        let file = FileFingerprint::new();
        let original_sha256 = fecmesh_common::checksum::sha256(data);
        let encoded = self.codec.encode(data).map_err(Error::from)?;

        let created_at = now();
        let expires_at = created_at
            .checked_add(Duration::from_secs(
                u64::from(self.config.storage.retention_days) * 86_400,
            ))
            .ok_or_else(|| Error::internal("retention window overflowed"))?;

        let mut chunk_hashes = HashMap::new();
        let mut shard_records = Vec::with_capacity(encoded.shards.len());
        for (index, shard) in encoded.shards.iter().enumerate() {
            let index = index as u16;
            let digest = self.store.put(&owner, &file, index, shard).await?;
            chunk_hashes.insert(index, digest);
            shard_records.push(ShardRecord {
                file_fingerprint: file,
                shard_index: index,
                owner,
                local_path: format!("{index}.shard"),
                sha256: digest,
                kind: shard_kind(index, self.codec.k(), self.codec.m()),
                size: shard.len() as u64,
                stored_at: created_at,
                expires_at,
                last_accessed: created_at,
                status: ShardStatus::Verified,
            });
        }

        let manifest = FileManifest {
            file_fingerprint: file,
            owner,
            logical_name,
            tags,
            original_size: data.len() as u64,
            original_sha256,
            data_shards: self.codec.k(),
            parity_shards: self.codec.m(),
            chunk_size: encoded.shard_size as u32,
            algorithm: "reed-solomon+lrc".to_string(),
            local_groups: encoded.local_groups.clone(),
            global_recovery_indices: (self.codec.k()..self.codec.k() + self.codec.m()).collect(),
            chunk_hashes,
            created_at,
            expires_at,
        };

        self.store.put_manifest(&owner, &file, &manifest).await?;
        self.meta.insert_manifest_with_shards(&manifest, &shard_records)?;

        info!(file = %file, shards = manifest.total_shards(), "chunked file");
        Ok(manifest)
    }

    /// Assign each shard to a peer round-robin (§4.5/§4.6 policy),
    /// store it there over C4, and mark the location confirmed on ack.
    /// At most one distribution runs per file at a time (P4).
    #[instrument(skip(self), fields(file = %file))]
    pub async fn distribute_chunks(
        &self,
        owner: OwnerId,
        file: FileFingerprint,
        delete_local_after_confirm: bool,
    ) -> Result<DistributionReport> {
        self.enter_distribution(file)?;
        let result = self
            .distribute_chunks_inner(owner, file, delete_local_after_confirm)
            .await;
        self.exit_distribution(&file);
        result
    }

    fn enter_distribution(&self, file: FileFingerprint) -> Result<()> {
        let mut guard = self.in_flight.lock();
        if !guard.insert(file) {
            return Err(Error::AlreadyInProgress(format!(
                "distribution already running for {file}"
            )));
        }
        Ok(())
    }

    fn exit_distribution(&self, file: &FileFingerprint) {
        self.in_flight.lock().remove(file);
    }

    async fn distribute_chunks_inner(
        &self,
        owner: OwnerId,
        file: FileFingerprint,
        delete_local_after_confirm: bool,
    ) -> Result<DistributionReport> {
        let shards = self.meta.list_shards_for_file(&file)?;
        let online: Vec<_> = self
            .meta
            .peers_above_reliability(self.config.network.min_reliability_score)?
            .into_iter()
            .filter(|p| p.online)
            .collect();
        if online.is_empty() {
            return Err(Error::Replication(
                "no eligible peers available for distribution".to_string(),
            ));
        }
        let ranked = selection::rank_candidates(online, &[]);
        let assignment = selection::round_robin_assignment(&ranked, shards.len());

        let mut report = DistributionReport {
            file_fingerprint: Some(file),
            assigned: assignment.len(),
            ..Default::default()
        };

        for (shard, peer) in shards.iter().zip(assignment.iter()) {
            if let Err(e) = self
                .distribute_one(&owner, &file, shard.shard_index, peer, delete_local_after_confirm)
                .await
            {
                warn!(shard = shard.shard_index, peer = %peer, error = %e, "failed to distribute shard");
                report.failed.push((shard.shard_index, e.to_string()));
                continue;
            }
            report.confirmed += 1;
            if delete_local_after_confirm {
                report.local_deleted += 1;
            }
        }

        Ok(report)
    }

    async fn distribute_one(
        &self,
        owner: &OwnerId,
        file: &FileFingerprint,
        index: u16,
        peer: &PeerId,
        delete_local_after_confirm: bool,
    ) -> Result<()> {
        let bytes = self.store.get(owner, file, index).await?;
        self.meta.put_location(&LocationRecord {
            file_fingerprint: *file,
            shard_index: index,
            owner: *owner,
            peer_id: peer.clone(),
            assigned_at: now(),
            confirmed_at: None,
            status: LocationStatus::Pending,
            attempts: 0,
            failure_reason: None,
        })?;

        let req = StoreChunkRequest {
            file: file.to_string(),
            index,
            owner: owner.to_string(),
            chunk_b64: b64::encode(&bytes),
            content_hash: sha256_hex(&bytes),
            chunk_size: bytes.len() as u64,
        };

        match self
            .rpc
            .store_chunk_at_least_once(
                peer,
                req,
                self.config.replication.max_retries,
                Duration::from_secs(self.config.network.connection_retry_delay_seconds),
            )
            .await
        {
            Ok(_) => {
                self.meta.confirm_location(file, index, peer)?;
                self.meta.touch_shard(file, index)?;
                if delete_local_after_confirm {
                    self.store.delete(owner, file, index).await?;
                }
                Ok(())
            }
            Err(e) => {
                let err: Error = e.into();
                self.meta
                    .set_location_status(file, index, peer, LocationStatus::Failed, Some(err.to_string()))?;
                Err(err)
            }
        }
    }

    /// Collect local (C2) and remote (C4) shards, decode (LRC first,
    /// then RS), and verify the reassembled bytes against the
    /// manifest's whole-file hash (§4.5).
    #[instrument(skip(self), fields(file = %file))]
    pub async fn reconstruct_file(&self, owner: OwnerId, file: FileFingerprint) -> Result<Vec<u8>> {
        let manifest = self.meta.get_manifest(&file)?;
        let shards = self.meta.list_shards_for_file(&file)?;
        let mut input = DecodeInput::new();

        for shard in &shards {
            let Ok(bytes) = self.store.get(&owner, &file, shard.shard_index).await else {
                continue;
            };
            if fecmesh_common::checksum::sha256(&bytes) == shard.sha256 {
                input.insert(shard.shard_index, bytes);
            } else {
                warn!(file = %file, index = shard.shard_index, "local shard failed verification");
                self.meta
                    .set_shard_status(&file, shard.shard_index, ShardStatus::Corrupted)?;
            }
        }

        if (input.shards.len() as u16) < manifest.required_for_reconstruction() {
            self.collect_remote_shards(&owner, &file, &manifest, &mut input).await;
        }

        let bytes = self
            .codec
            .decode(&input, manifest.chunk_size as usize, manifest.original_size as usize)
            .map_err(Error::from)?;

        let actual = fecmesh_common::checksum::sha256(&bytes);
        if actual != manifest.original_sha256 {
            return Err(Error::Validation {
                expected: hex::encode(manifest.original_sha256),
                actual: hex::encode(actual),
            });
        }
        Ok(bytes)
    }

    async fn collect_remote_shards(
        &self,
        owner: &OwnerId,
        file: &FileFingerprint,
        manifest: &FileManifest,
        input: &mut DecodeInput,
    ) {
        let Ok(locations) = self.meta.list_locations_for_file(file) else {
            return;
        };
        for location in locations {
            if (input.shards.len() as u16) >= manifest.required_for_reconstruction() {
                break;
            }
            if input.shards.contains_key(&location.shard_index) {
                continue;
            }
            if location.status != LocationStatus::Confirmed {
                continue;
            }
            let Ok(resp) = self
                .rpc
                .get_chunk(
                    &location.peer_id,
                    GetChunkRequest {
                        file: file.to_string(),
                        index: location.shard_index,
                        owner: owner.to_string(),
                    },
                )
                .await
            else {
                continue;
            };
            let Ok(bytes) = b64::decode(&resp.chunk_b64) else {
                continue;
            };
            if sha256_hex(&bytes) != resp.content_hash {
                continue;
            }
            input.insert(location.shard_index, bytes);
        }
    }

    /// Remove every local and remote copy of a file's shards, then its
    /// metadata rows (§4.5).
    #[instrument(skip(self), fields(file = %file))]
    pub async fn delete_file(&self, owner: OwnerId, file: FileFingerprint) -> Result<()> {
        for location in self.meta.list_locations_for_file(&file)? {
            let req = DeleteChunkRequest {
                file: file.to_string(),
                index: location.shard_index,
                owner: owner.to_string(),
            };
            if let Err(e) = self.rpc.delete_chunk(&location.peer_id, req).await {
                warn!(peer = %location.peer_id, error = %e, "failed to delete remote shard, continuing");
            }
        }
        self.store.delete_file(&owner, &file).await?;
        self.meta.delete_file_rows(&file)?;
        Ok(())
    }

    /// Read-only chunking/distribution summary for one file.
    pub fn file_status(&self, file: FileFingerprint) -> Result<FileStatus> {
        let manifest = match self.meta.get_manifest(&file) {
            Ok(m) => m,
            Err(e) if e.is_not_found() => return Ok(FileStatus::default()),
            Err(e) => return Err(e),
        };
        let confirmed: HashSet<u16> = self
            .meta
            .list_locations_for_file(&file)?
            .into_iter()
            .filter(|l| l.status == LocationStatus::Confirmed)
            .map(|l| l.shard_index)
            .collect();
        let total = manifest.total_shards();
        let distribution_pct = if total == 0 {
            0.0
        } else {
            f64::from(confirmed.len() as u32) / f64::from(u32::from(total)) * 100.0
        };
        Ok(FileStatus {
            chunked: true,
            distributed: !confirmed.is_empty(),
            reconstructable: confirmed.len() as u16 >= manifest.required_for_reconstruction(),
            distribution_pct,
        })
    }
}

fn shard_kind(index: u16, k: u16, m: u16) -> ShardKind {
    if index < k {
        ShardKind::Data
    } else if index < k + m {
        ShardKind::Parity
    } else {
        ShardKind::LocalRecovery
    }
}
