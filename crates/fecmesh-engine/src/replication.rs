//! Replication controller (C6): react to peer loss by relocating the
//! shards that peer held, and keep the global reliability scores and
//! retention GC current (§4.6/§4.7).
//!
//! Grounded in `original_source/chunking/replication_mgr.py`'s
//! `ReplicationManager` (`on_peer_disconnected`,
//! `_process_single_relocation`, `cleanup_expired_shards`). One
//! deliberate behavior change from that original: `_process_single_relocation`
//! there ships a relocated shard with a literal empty `content_hash`
//! (a `TODO: compute real hash` left unresolved); this controller
//! always computes the real SHA-256 of the bytes it just fetched
//! before forwarding them, per §7.

use std::sync::Arc;
use std::time::Duration;

use fecmesh_common::{
    sha256_hex, time::now, ChunkAtRisk, Error, FileFingerprint, LocationRecord, LocationStatus,
    OwnerId, PeerId, ReplicationReason, ReplicationStatus, ReplicationTask, Result,
};
use fecmesh_meta::MetaIndex;
use fecmesh_rpc::methods::{GetChunkRequest, StoreChunkRequest};
use fecmesh_rpc::RpcClient;
use fecmesh_store::ChunkStore;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::b64;
use crate::selection;

/// Reacts to peer loss and drains the resulting relocation backlog.
pub struct ReplicationController {
    config: fecmesh_common::config::ReplicationConfig,
    min_reliability_score: f64,
    store: ChunkStore,
    meta: Arc<MetaIndex>,
    rpc: Arc<RpcClient>,
}

impl ReplicationController {
    pub fn new(
        config: fecmesh_common::config::ReplicationConfig,
        min_reliability_score: f64,
        store: ChunkStore,
        meta: Arc<MetaIndex>,
        rpc: Arc<RpcClient>,
    ) -> Self {
        Self {
            config,
            min_reliability_score,
            store,
            meta,
            rpc,
        }
    }

    /// A peer dropped off the network: mark it offline, penalize its
    /// reliability, and enqueue a relocation task for every location it
    /// held (§4.6).
    #[instrument(skip(self), fields(peer = %peer))]
    pub async fn on_peer_disconnected(&self, peer: &PeerId) -> Result<usize> {
        self.meta.set_peer_offline(peer)?;
        self.meta.update_peer_reliability(peer, -0.1)?;
        let affected = self.meta.mark_peer_locations_failed(peer)?;

        let mut enqueued = 0;
        for location in affected {
            let task = ReplicationTask {
                id: Uuid::new_v4(),
                file_fingerprint: location.file_fingerprint,
                shard_index: location.shard_index,
                owner: location.owner,
                source_peer: peer.clone(),
                target_peer: None,
                reason: ReplicationReason::PeerDisconnected,
                created_at: now(),
                completed_at: None,
                attempts: 0,
                status: ReplicationStatus::Pending,
                error: None,
            };
            self.meta.enqueue_replication_task(&task)?;
            self.meta.set_location_status(
                &location.file_fingerprint,
                location.shard_index,
                peer,
                LocationStatus::Relocated,
                Some("source peer disconnected".to_string()),
            )?;
            enqueued += 1;
        }

        info!(peer = %peer, tasks = enqueued, "peer disconnected, relocation tasks enqueued");
        Ok(enqueued)
    }

    /// Drain up to `batch_size` pending relocation tasks (§4.6, C7's
    /// replication loop calls this on a timer).
    pub async fn drain_pending(&self) -> Result<usize> {
        let tasks = self.meta.next_pending_tasks(self.config.batch_size)?;
        let mut processed = 0;
        for task in tasks {
            self.process_single_relocation(task).await?;
            processed += 1;
        }
        Ok(processed)
    }

    async fn process_single_relocation(&self, mut task: ReplicationTask) -> Result<()> {
        task.status = ReplicationStatus::InProgress;
        task.attempts += 1;
        self.meta.update_replication_task(&task)?;

        match self.relocate_shard(&task).await {
            Ok(target) => {
                task.status = ReplicationStatus::Completed;
                task.completed_at = Some(now());
                task.target_peer = Some(target.clone());
                task.error = None;
                self.meta.update_replication_task(&task)?;
                self.meta.update_peer_reliability(&target, 0.05)?;
                info!(file = %task.file_fingerprint, shard = task.shard_index, target = %target, "relocated shard");
            }
            Err(e) => {
                warn!(file = %task.file_fingerprint, shard = task.shard_index, error = %e, "relocation attempt failed");
                if task.attempts >= self.config.max_retries {
                    task.status = ReplicationStatus::Failed;
                } else {
                    task.status = ReplicationStatus::Pending;
                }
                task.error = Some(e.to_string());
                self.meta.update_replication_task(&task)?;
            }
        }
        Ok(())
    }

    /// Fetch the shard's bytes, pick a replacement peer, and ship it
    /// there with a freshly computed content hash (§7).
    async fn relocate_shard(&self, task: &ReplicationTask) -> Result<PeerId> {
        let bytes = self.fetch_shard_bytes(task).await?;

        let already_holding: Vec<PeerId> = self
            .meta
            .list_locations_for_shard(&task.file_fingerprint, task.shard_index)?
            .into_iter()
            .filter(|l| l.status == LocationStatus::Confirmed)
            .map(|l| l.peer_id)
            .collect();

        let online = self.meta.peers_above_reliability(self.min_reliability_score)?;
        let ranked = selection::rank_candidates(online, &[task.source_peer.clone()]);
        let target = selection::select_replacement(&ranked, &already_holding)
            .ok_or_else(|| Error::Replication("no eligible replacement peer available".to_string()))?
            .peer_id
            .clone();

        // Never forward an empty content hash: the real fix for the
        // relocation bug this controller exists to not repeat.
        let content_hash = sha256_hex(&bytes);
        let req = StoreChunkRequest {
            file: task.file_fingerprint.to_string(),
            index: task.shard_index,
            owner: task.owner.to_string(),
            chunk_b64: b64::encode(&bytes),
            content_hash,
            chunk_size: bytes.len() as u64,
        };

        self.rpc
            .store_chunk_at_least_once(
                &target,
                req,
                self.config.max_retries,
                Duration::from_secs(5),
            )
            .await
            .map_err(|e| Error::PeerCommunication(e.to_string()))?;

        self.meta.put_location(&LocationRecord {
            file_fingerprint: task.file_fingerprint,
            shard_index: task.shard_index,
            owner: task.owner,
            peer_id: target.clone(),
            assigned_at: now(),
            confirmed_at: None,
            status: LocationStatus::Pending,
            attempts: 0,
            failure_reason: None,
        })?;
        self.meta.confirm_location(&task.file_fingerprint, task.shard_index, &target)?;

        Ok(target)
    }

    /// Local store first; otherwise ask any other peer still confirmed
    /// to hold this shard, verifying its claimed hash before trusting
    /// it.
    async fn fetch_shard_bytes(&self, task: &ReplicationTask) -> Result<Vec<u8>> {
        if let Ok(bytes) = self.store.get(&task.owner, &task.file_fingerprint, task.shard_index).await {
            return Ok(bytes);
        }

        let locations = self
            .meta
            .list_locations_for_shard(&task.file_fingerprint, task.shard_index)?;
        for location in locations {
            if location.peer_id == task.source_peer || location.status != LocationStatus::Confirmed {
                continue;
            }
            let Ok(resp) = self
                .rpc
                .get_chunk(
                    &location.peer_id,
                    GetChunkRequest {
                        file: task.file_fingerprint.to_string(),
                        index: task.shard_index,
                        owner: task.owner.to_string(),
                    },
                )
                .await
            else {
                continue;
            };
            let Ok(bytes) = b64::decode(&resp.chunk_b64) else {
                continue;
            };
            if sha256_hex(&bytes) == resp.content_hash {
                return Ok(bytes);
            }
        }

        Err(Error::ShardNotFound {
            file: task.file_fingerprint.to_string(),
            index: task.shard_index,
            owner: task.owner.to_string(),
        })
    }

    /// Retention GC (§4.7): remove local and remote copies of shards
    /// past their `expires_at`, then their metadata rows.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let expired = self.meta.expired_shards()?;
        let mut removed = 0;
        for shard in &expired {
            let _ = self
                .store
                .delete(&shard.owner, &shard.file_fingerprint, shard.shard_index)
                .await;
            for location in self
                .meta
                .list_locations_for_shard(&shard.file_fingerprint, shard.shard_index)?
            {
                self.meta.remove_location(&shard.file_fingerprint, shard.shard_index, &location.peer_id)?;
            }
            removed += 1;
        }
        self.meta.cleanup_expired()?;
        Ok(removed)
    }

    /// Shards whose confirmed replica count is `<= 1` or whose best
    /// hosting peer has reliability `< min_reliability_score` (§4.6).
    /// Grounded on `replication_mgr.py::get_chunks_at_risk`'s
    /// `GROUP BY file_uuid, chunk_idx HAVING replica_count <= 1 OR
    /// min_reliability < 0.5` query, evaluated per file owned by
    /// `owner` instead of with a single SQL join.
    pub fn chunks_at_risk(&self, owner: &OwnerId) -> Result<Vec<ChunkAtRisk>> {
        let mut at_risk = Vec::new();
        for manifest in self.meta.list_manifests_for_owner(owner)? {
            let mut by_shard: std::collections::HashMap<u16, Vec<PeerId>> =
                std::collections::HashMap::new();
            for location in self.meta.list_locations_for_file(&manifest.file_fingerprint)? {
                if location.status == LocationStatus::Confirmed {
                    by_shard.entry(location.shard_index).or_default().push(location.peer_id);
                }
            }
            for (shard_index, peers) in by_shard {
                let mut min_reliability = 1.0f64;
                for peer in &peers {
                    if let Some(record) = self.meta.get_peer(peer)? {
                        min_reliability = min_reliability.min(record.reliability);
                    } else {
                        min_reliability = 0.0;
                    }
                }
                if peers.len() <= 1 || min_reliability < self.min_reliability_score {
                    at_risk.push(ChunkAtRisk {
                        file_fingerprint: manifest.file_fingerprint,
                        shard_index,
                        owner: manifest.owner,
                        replica_count: peers.len(),
                        min_reliability,
                    });
                }
            }
        }
        Ok(at_risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fecmesh_common::config::{NetworkConfig, ReplicationConfig};
    use fecmesh_rpc::oracle::NullOracle;

    async fn test_controller() -> (ReplicationController, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path().join("shards")).await.unwrap();
        let meta = Arc::new(MetaIndex::open(dir.path().join("meta.redb")).unwrap());
        let rpc = Arc::new(RpcClient::new(
            Arc::new(NullOracle),
            NetworkConfig::default(),
            Uuid::new_v4(),
        ));
        let controller = ReplicationController::new(ReplicationConfig::default(), 0.5, store, meta, rpc);
        (controller, dir)
    }

    #[tokio::test]
    async fn on_peer_disconnected_enqueues_one_task_per_location() {
        let (controller, _dir) = test_controller().await;
        let peer = PeerId::new("peer-a");
        controller
            .meta
            .upsert_peer(&fecmesh_common::PeerRecord {
                peer_id: peer.clone(),
                host: "10.0.0.5".to_string(),
                port: 9101,
                reliability: 0.9,
                shards_stored: 2,
                first_seen: now(),
                last_seen: now(),
                online: true,
                storage_available: None,
            })
            .unwrap();

        let file = FileFingerprint::new();
        let owner = OwnerId::new();
        controller
            .meta
            .put_location(&LocationRecord {
                file_fingerprint: file,
                shard_index: 0,
                owner,
                peer_id: peer.clone(),
                assigned_at: now(),
                confirmed_at: Some(now()),
                status: LocationStatus::Confirmed,
                attempts: 1,
                failure_reason: None,
            })
            .unwrap();

        let enqueued = controller.on_peer_disconnected(&peer).await.unwrap();
        assert_eq!(enqueued, 1);

        let peer_row = controller.meta.get_peer(&peer).unwrap().unwrap();
        assert!(!peer_row.online);
        assert!(peer_row.reliability < 0.9);

        let tasks = controller.meta.next_pending_tasks(10).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].reason, ReplicationReason::PeerDisconnected);
    }

    #[tokio::test]
    async fn drain_pending_with_no_tasks_is_a_no_op() {
        let (controller, _dir) = test_controller().await;
        assert_eq!(controller.drain_pending().await.unwrap(), 0);
    }

    fn bare_manifest(owner: OwnerId) -> fecmesh_common::FileManifest {
        fecmesh_common::FileManifest {
            file_fingerprint: FileFingerprint::new(),
            owner,
            logical_name: None,
            tags: vec![],
            original_size: 1024,
            original_sha256: [0u8; 32],
            data_shards: 4,
            parity_shards: 2,
            chunk_size: 256,
            algorithm: "reed-solomon+lrc".to_string(),
            local_groups: vec![],
            global_recovery_indices: vec![4, 5],
            chunk_hashes: std::collections::HashMap::new(),
            created_at: now(),
            expires_at: now(),
        }
    }

    #[tokio::test]
    async fn chunks_at_risk_flags_single_replica_and_unreliable_peer() {
        let (controller, _dir) = test_controller().await;
        let owner = OwnerId::new();
        let manifest = bare_manifest(owner);
        controller.meta.put_manifest(&manifest).unwrap();

        let lonely_peer = PeerId::new("peer-lonely:9101");
        controller
            .meta
            .upsert_peer(&fecmesh_common::PeerRecord {
                peer_id: lonely_peer.clone(),
                host: "peer-lonely".to_string(),
                port: 9101,
                reliability: 0.9,
                shards_stored: 1,
                first_seen: now(),
                last_seen: now(),
                online: true,
                storage_available: None,
            })
            .unwrap();
        controller
            .meta
            .put_location(&LocationRecord {
                file_fingerprint: manifest.file_fingerprint,
                shard_index: 0,
                owner,
                peer_id: lonely_peer.clone(),
                assigned_at: now(),
                confirmed_at: Some(now()),
                status: LocationStatus::Confirmed,
                attempts: 1,
                failure_reason: None,
            })
            .unwrap();

        let at_risk = controller.chunks_at_risk(&owner).unwrap();
        assert_eq!(at_risk.len(), 1);
        assert_eq!(at_risk[0].shard_index, 0);
        assert_eq!(at_risk[0].replica_count, 1);
    }
}
