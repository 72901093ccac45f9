//! Metadata index (C3): manifests, shard records, shard locations,
//! replication tasks, and peer records, all backed by a single redb
//! database file. Every operation is a self-contained read or write
//! transaction — no long-lived cursors are handed back to callers.

use std::path::Path;
use std::sync::Arc;

use fecmesh_common::{
    time::now, Error, FileFingerprint, FileManifest, LocationRecord, LocationStatus, OwnerId,
    PeerId, PeerRecord, ReplicationStatus, ReplicationTask, Result, ShardRecord, ShardStatus,
};
use redb::{Database, ReadableTable, WriteTransaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::tables::{
    file_prefix, location_key, shard_key, shard_prefix, LOCATIONS, MANIFESTS, PEERS,
    REPLICATION_TASKS, SHARDS,
};

/// Embedded metadata index for a single node.
pub struct MetaIndex {
    db: Arc<Database>,
}

impl MetaIndex {
    /// Open (creating if necessary) the index at `path`, and ensure
    /// every table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(index_err)?;
        let wtx = db.begin_write().map_err(index_err)?;
        wtx.open_table(MANIFESTS).map_err(index_err)?;
        wtx.open_table(SHARDS).map_err(index_err)?;
        wtx.open_table(LOCATIONS).map_err(index_err)?;
        wtx.open_table(REPLICATION_TASKS).map_err(index_err)?;
        wtx.open_table(PEERS).map_err(index_err)?;
        wtx.commit().map_err(index_err)?;
        Ok(Self { db: Arc::new(db) })
    }

    // ---- manifests ----------------------------------------------------

    #[instrument(skip(self, manifest), fields(file = %manifest.file_fingerprint))]
    pub fn put_manifest(&self, manifest: &FileManifest) -> Result<()> {
        let key = manifest.file_fingerprint.to_string();
        let json = serde_json::to_string(manifest)?;
        let wtx = self.db.begin_write().map_err(index_err)?;
        wtx.open_table(MANIFESTS)
            .map_err(index_err)?
            .insert(key.as_str(), json.as_str())
            .map_err(index_err)?;
        wtx.commit().map_err(index_err)?;
        debug!("stored manifest");
        Ok(())
    }

    pub fn get_manifest(&self, file: &FileFingerprint) -> Result<FileManifest> {
        let key = file.to_string();
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(MANIFESTS).map_err(index_err)?;
        let row = table.get(key.as_str()).map_err(index_err)?;
        let json = row.ok_or_else(|| Error::ManifestNotFound(key.clone()))?;
        Ok(serde_json::from_str(json.value())?)
    }

    pub fn delete_manifest(&self, file: &FileFingerprint) -> Result<()> {
        let key = file.to_string();
        let wtx = self.db.begin_write().map_err(index_err)?;
        wtx.open_table(MANIFESTS)
            .map_err(index_err)?
            .remove(key.as_str())
            .map_err(index_err)?;
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    /// List every manifest owned by `owner`. A full-table scan; fine
    /// for the node-local manifest counts this system expects (§4.3
    /// leaves cross-node manifest search out of scope).
    pub fn list_manifests_for_owner(&self, owner: &OwnerId) -> Result<Vec<FileManifest>> {
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(MANIFESTS).map_err(index_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(index_err)? {
            let (_, value) = row.map_err(index_err)?;
            let manifest: FileManifest = serde_json::from_str(value.value())?;
            if &manifest.owner == owner {
                out.push(manifest);
            }
        }
        Ok(out)
    }

    // ---- shard records --------------------------------------------------

    pub fn put_shard(&self, record: &ShardRecord) -> Result<()> {
        let key = shard_key(&record.file_fingerprint.to_string(), record.shard_index);
        let json = serde_json::to_string(record)?;
        let wtx = self.db.begin_write().map_err(index_err)?;
        wtx.open_table(SHARDS)
            .map_err(index_err)?
            .insert(key.as_str(), json.as_str())
            .map_err(index_err)?;
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    pub fn get_shard(&self, file: &FileFingerprint, index: u16) -> Result<ShardRecord> {
        let key = shard_key(&file.to_string(), index);
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(SHARDS).map_err(index_err)?;
        let row = table.get(key.as_str()).map_err(index_err)?;
        let json = row.ok_or_else(|| Error::ShardNotFound {
            file: file.to_string(),
            index,
            owner: String::new(),
        })?;
        Ok(serde_json::from_str(json.value())?)
    }

    /// Every shard record for `file`, ordered by index (the `%05`
    /// zero-padded key keeps lexicographic and numeric order aligned).
    pub fn list_shards_for_file(&self, file: &FileFingerprint) -> Result<Vec<ShardRecord>> {
        let prefix = file_prefix(&file.to_string());
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(SHARDS).map_err(index_err)?;
        let mut out = Vec::new();
        for row in table.range(prefix.as_str()..).map_err(index_err)? {
            let (k, v) = row.map_err(index_err)?;
            if !k.value().starts_with(&prefix) {
                break;
            }
            out.push(serde_json::from_str(v.value())?);
        }
        Ok(out)
    }

    // ---- shard locations -------------------------------------------------

    pub fn put_location(&self, record: &LocationRecord) -> Result<()> {
        let key = location_key(
            &record.file_fingerprint.to_string(),
            record.shard_index,
            record.peer_id.as_str(),
        );
        let json = serde_json::to_string(record)?;
        let wtx = self.db.begin_write().map_err(index_err)?;
        wtx.open_table(LOCATIONS)
            .map_err(index_err)?
            .insert(key.as_str(), json.as_str())
            .map_err(index_err)?;
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    pub fn remove_location(&self, file: &FileFingerprint, index: u16, peer: &PeerId) -> Result<()> {
        let key = location_key(&file.to_string(), index, peer.as_str());
        let wtx = self.db.begin_write().map_err(index_err)?;
        wtx.open_table(LOCATIONS)
            .map_err(index_err)?
            .remove(key.as_str())
            .map_err(index_err)?;
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    /// Every known location for a single shard.
    pub fn list_locations_for_shard(
        &self,
        file: &FileFingerprint,
        index: u16,
    ) -> Result<Vec<LocationRecord>> {
        let prefix = shard_prefix(&file.to_string(), index);
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(LOCATIONS).map_err(index_err)?;
        let mut out = Vec::new();
        for row in table.range(prefix.as_str()..).map_err(index_err)? {
            let (k, v) = row.map_err(index_err)?;
            if !k.value().starts_with(&prefix) {
                break;
            }
            out.push(serde_json::from_str(v.value())?);
        }
        Ok(out)
    }

    /// Every known location across every shard of `file`.
    pub fn list_locations_for_file(&self, file: &FileFingerprint) -> Result<Vec<LocationRecord>> {
        let prefix = file_prefix(&file.to_string());
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(LOCATIONS).map_err(index_err)?;
        let mut out = Vec::new();
        for row in table.range(prefix.as_str()..).map_err(index_err)? {
            let (k, v) = row.map_err(index_err)?;
            if !k.value().starts_with(&prefix) {
                break;
            }
            out.push(serde_json::from_str(v.value())?);
        }
        Ok(out)
    }

    /// Mark every *confirmed* location for `peer` across all files as
    /// failed, and return the ones that were touched (so the
    /// replication controller can enqueue relocation tasks for them).
    /// Locations already `Relocated` off this peer (from an earlier
    /// disconnect) are left alone, so a repeat disconnect/reconnect
    /// cycle doesn't re-enqueue relocation work for shards that already
    /// moved (§4.6 step 2).
    pub fn mark_peer_locations_failed(&self, peer: &PeerId) -> Result<Vec<LocationRecord>> {
        let wtx = self.db.begin_write().map_err(index_err)?;
        let mut touched = Vec::new();
        {
            let mut table = wtx.open_table(LOCATIONS).map_err(index_err)?;
            let keys: Vec<String> = table
                .iter()
                .map_err(index_err)?
                .filter_map(|row| row.ok())
                .map(|(k, _)| k.value().to_string())
                .collect();
            for key in keys {
                let Some(guard) = table.get(key.as_str()).map_err(index_err)? else {
                    continue;
                };
                let mut record: LocationRecord = serde_json::from_str(guard.value())?;
                drop(guard);
                if &record.peer_id != peer || record.status != LocationStatus::Confirmed {
                    continue;
                }
                record.status = LocationStatus::Failed;
                let json = serde_json::to_string(&record)?;
                table.insert(key.as_str(), json.as_str()).map_err(index_err)?;
                touched.push(record);
            }
        }
        wtx.commit().map_err(index_err)?;
        Ok(touched)
    }

    // ---- replication tasks ------------------------------------------------

    pub fn enqueue_replication_task(&self, task: &ReplicationTask) -> Result<()> {
        let key = task.id.to_string();
        let json = serde_json::to_string(task)?;
        let wtx = self.db.begin_write().map_err(index_err)?;
        wtx.open_table(REPLICATION_TASKS)
            .map_err(index_err)?
            .insert(key.as_str(), json.as_str())
            .map_err(index_err)?;
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    pub fn update_replication_task(&self, task: &ReplicationTask) -> Result<()> {
        self.enqueue_replication_task(task)
    }

    pub fn get_replication_task(&self, id: Uuid) -> Result<ReplicationTask> {
        let key = id.to_string();
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(REPLICATION_TASKS).map_err(index_err)?;
        let row = table.get(key.as_str()).map_err(index_err)?;
        let json = row.ok_or_else(|| Error::Replication(format!("task {id} not found")))?;
        Ok(serde_json::from_str(json.value())?)
    }

    /// Pull up to `limit` pending tasks, oldest-created first, for the
    /// replication controller's batch drain (§4.6).
    pub fn next_pending_tasks(&self, limit: usize) -> Result<Vec<ReplicationTask>> {
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(REPLICATION_TASKS).map_err(index_err)?;
        let mut pending = Vec::new();
        for row in table.iter().map_err(index_err)? {
            let (_, v) = row.map_err(index_err)?;
            let task: ReplicationTask = serde_json::from_str(v.value())?;
            if task.status == ReplicationStatus::Pending {
                pending.push(task);
            }
        }
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    // ---- peers --------------------------------------------------------

    pub fn upsert_peer(&self, peer: &PeerRecord) -> Result<()> {
        let key = peer.peer_id.as_str().to_string();
        let json = serde_json::to_string(peer)?;
        let wtx = self.db.begin_write().map_err(index_err)?;
        wtx.open_table(PEERS)
            .map_err(index_err)?
            .insert(key.as_str(), json.as_str())
            .map_err(index_err)?;
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    pub fn get_peer(&self, peer_id: &PeerId) -> Result<Option<PeerRecord>> {
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(PEERS).map_err(index_err)?;
        let row = table.get(peer_id.as_str()).map_err(index_err)?;
        row.map(|v| serde_json::from_str(v.value()).map_err(Error::from))
            .transpose()
    }

    pub fn list_peers(&self) -> Result<Vec<PeerRecord>> {
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(PEERS).map_err(index_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(index_err)? {
            let (_, v) = row.map_err(index_err)?;
            out.push(serde_json::from_str(v.value())?);
        }
        Ok(out)
    }

    /// Peers whose reliability score meets `min_score`, the candidate
    /// pool for new shard placement (§4.2's peer selection policy).
    pub fn peers_above_reliability(&self, min_score: f64) -> Result<Vec<PeerRecord>> {
        Ok(self
            .list_peers()?
            .into_iter()
            .filter(|p| p.reliability >= min_score)
            .collect())
    }

    /// Online peers only, the base candidate pool before the
    /// reliability floor is applied (§4.3: `online_peers()`).
    pub fn online_peers(&self) -> Result<Vec<PeerRecord>> {
        Ok(self.list_peers()?.into_iter().filter(|p| p.online).collect())
    }

    /// Flip a peer offline, e.g. on `on_peer_disconnected` (§4.6).
    /// A no-op if the peer is unknown.
    pub fn set_peer_offline(&self, peer: &PeerId) -> Result<()> {
        if let Some(mut record) = self.get_peer(peer)? {
            record.online = false;
            record.last_seen = now();
            self.upsert_peer(&record)?;
        }
        Ok(())
    }

    /// Adjust a peer's reliability by `delta`, clamped to `[0, 1]`
    /// (§4.6: −0.1 on disconnect, +0.05 on successful relocation).
    pub fn update_peer_reliability(&self, peer: &PeerId, delta: f64) -> Result<()> {
        if let Some(mut record) = self.get_peer(peer)? {
            record.adjust_reliability(delta);
            self.upsert_peer(&record)?;
        }
        Ok(())
    }

    // ---- shard record lifecycle ------------------------------------------

    /// Mark a shard's lifecycle status, e.g. `corrupted` on a failed
    /// verification (§3 invariant 3).
    pub fn set_shard_status(&self, file: &FileFingerprint, index: u16, status: ShardStatus) -> Result<()> {
        let mut record = self.get_shard(file, index)?;
        record.status = status;
        self.put_shard(&record)
    }

    /// Bump `last_accessed` on a shard, e.g. after it is read for
    /// reconstruction or distribution.
    pub fn touch_shard(&self, file: &FileFingerprint, index: u16) -> Result<()> {
        let mut record = self.get_shard(file, index)?;
        record.last_accessed = now();
        self.put_shard(&record)
    }

    pub fn delete_shard(&self, file: &FileFingerprint, index: u16) -> Result<()> {
        let key = shard_key(&file.to_string(), index);
        let wtx = self.db.begin_write().map_err(index_err)?;
        wtx.open_table(SHARDS)
            .map_err(index_err)?
            .remove(key.as_str())
            .map_err(index_err)?;
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    /// Every shard whose retention window has elapsed (§3 invariant
    /// 4: `stored_at + retention_days < now`), across every file.
    pub fn expired_shards(&self) -> Result<Vec<ShardRecord>> {
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(SHARDS).map_err(index_err)?;
        let now = now();
        let mut out = Vec::new();
        for row in table.iter().map_err(index_err)? {
            let (_, v) = row.map_err(index_err)?;
            let record: ShardRecord = serde_json::from_str(v.value())?;
            if record.expires_at < now {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Delete every expired shard row, returning how many were
    /// removed. Callers are responsible for also deleting the shard's
    /// bytes from the chunk store (C2).
    pub fn cleanup_expired(&self) -> Result<usize> {
        let expired = self.expired_shards()?;
        for record in &expired {
            self.delete_shard(&record.file_fingerprint, record.shard_index)?;
        }
        Ok(expired.len())
    }

    // ---- location lifecycle ------------------------------------------

    /// Flip a location to `confirmed`, stamping `confirmed_at`.
    pub fn confirm_location(&self, file: &FileFingerprint, index: u16, peer: &PeerId) -> Result<()> {
        let key = location_key(&file.to_string(), index, peer.as_str());
        let wtx = self.db.begin_write().map_err(index_err)?;
        {
            let mut table = wtx.open_table(LOCATIONS).map_err(index_err)?;
            let guard = table.get(key.as_str()).map_err(index_err)?;
            let mut record: LocationRecord = match guard {
                Some(g) => serde_json::from_str(g.value())?,
                None => return Err(Error::Index(format!("location {key} not found"))),
            };
            drop(guard);
            record.status = LocationStatus::Confirmed;
            record.confirmed_at = Some(now());
            let json = serde_json::to_string(&record)?;
            table.insert(key.as_str(), json.as_str()).map_err(index_err)?;
        }
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    /// Set a location's status directly (e.g. `failed` or
    /// `relocated`), recording an optional failure reason.
    pub fn set_location_status(
        &self,
        file: &FileFingerprint,
        index: u16,
        peer: &PeerId,
        status: LocationStatus,
        failure_reason: Option<String>,
    ) -> Result<()> {
        let key = location_key(&file.to_string(), index, peer.as_str());
        let wtx = self.db.begin_write().map_err(index_err)?;
        {
            let mut table = wtx.open_table(LOCATIONS).map_err(index_err)?;
            let guard = table.get(key.as_str()).map_err(index_err)?;
            let mut record: LocationRecord = match guard {
                Some(g) => serde_json::from_str(g.value())?,
                None => return Err(Error::Index(format!("location {key} not found"))),
            };
            drop(guard);
            record.status = status;
            if failure_reason.is_some() {
                record.attempts += 1;
                record.failure_reason = failure_reason;
            }
            let json = serde_json::to_string(&record)?;
            table.insert(key.as_str(), json.as_str()).map_err(index_err)?;
        }
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    pub fn delete_location(&self, file: &FileFingerprint, index: u16, peer: &PeerId) -> Result<()> {
        self.remove_location(file, index, peer)
    }

    /// Every location still awaiting confirmation, across all files.
    pub fn pending_locations(&self) -> Result<Vec<LocationRecord>> {
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(LOCATIONS).map_err(index_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(index_err)? {
            let (_, v) = row.map_err(index_err)?;
            let record: LocationRecord = serde_json::from_str(v.value())?;
            if record.status == LocationStatus::Pending {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Every location currently assigned to `peer`, any status. Used
    /// by `on_peer_disconnected` (§4.6) to find confirmed locations to
    /// relocate.
    pub fn locations_by_peer(&self, peer: &PeerId) -> Result<Vec<LocationRecord>> {
        let rtx = self.db.begin_read().map_err(index_err)?;
        let table = rtx.open_table(LOCATIONS).map_err(index_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(index_err)? {
            let (_, v) = row.map_err(index_err)?;
            let record: LocationRecord = serde_json::from_str(v.value())?;
            if &record.peer_id == peer {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// A scoped write transaction: every mutation the closure performs
    /// through the handed-back `WriteTransaction` commits together, or
    /// rolls back (redb's own drop-without-commit behavior) if the
    /// closure returns an error. Implicit single-operation mutations
    /// (the methods above) commit immediately and do not go through
    /// this path (§4.3).
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&WriteTransaction) -> Result<T>,
    {
        let wtx = self.db.begin_write().map_err(index_err)?;
        let result = f(&wtx)?;
        wtx.commit().map_err(index_err)?;
        Ok(result)
    }

    /// Insert a manifest and its shard rows as a single transaction
    /// (`chunk_file`'s "no partial manifest is ever committed"
    /// guarantee, §4.5).
    pub fn insert_manifest_with_shards(
        &self,
        manifest: &FileManifest,
        shards: &[ShardRecord],
    ) -> Result<()> {
        let wtx = self.db.begin_write().map_err(index_err)?;
        {
            let mut manifests = wtx.open_table(MANIFESTS).map_err(index_err)?;
            let key = manifest.file_fingerprint.to_string();
            let json = serde_json::to_string(manifest)?;
            manifests.insert(key.as_str(), json.as_str()).map_err(index_err)?;
        }
        {
            let mut table = wtx.open_table(SHARDS).map_err(index_err)?;
            for record in shards {
                let key = shard_key(&record.file_fingerprint.to_string(), record.shard_index);
                let json = serde_json::to_string(record)?;
                table.insert(key.as_str(), json.as_str()).map_err(index_err)?;
            }
        }
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    /// Remove every shard, location, and manifest row for `file`.
    /// Used by `delete_file` (§4.5).
    pub fn delete_file_rows(&self, file: &FileFingerprint) -> Result<()> {
        let shard_prefix = file_prefix(&file.to_string());
        let wtx = self.db.begin_write().map_err(index_err)?;
        {
            let mut table = wtx.open_table(SHARDS).map_err(index_err)?;
            let keys: Vec<String> = table
                .range(shard_prefix.as_str()..)
                .map_err(index_err)?
                .filter_map(|row| row.ok())
                .map(|(k, _)| k.value().to_string())
                .take_while(|k| k.starts_with(&shard_prefix))
                .collect();
            for key in keys {
                table.remove(key.as_str()).map_err(index_err)?;
            }
        }
        {
            let mut table = wtx.open_table(LOCATIONS).map_err(index_err)?;
            let keys: Vec<String> = table
                .range(shard_prefix.as_str()..)
                .map_err(index_err)?
                .filter_map(|row| row.ok())
                .map(|(k, _)| k.value().to_string())
                .take_while(|k| k.starts_with(&shard_prefix))
                .collect();
            for key in keys {
                table.remove(key.as_str()).map_err(index_err)?;
            }
        }
        {
            let mut manifests = wtx.open_table(MANIFESTS).map_err(index_err)?;
            manifests.remove(file.to_string().as_str()).map_err(index_err)?;
        }
        wtx.commit().map_err(index_err)?;
        Ok(())
    }

    /// Internal consistency check (§4.3): every location row must
    /// reference a shard index within its manifest's total shard
    /// count, and every shard row must belong to a manifest that still
    /// exists. Cheap enough to run from the hourly integrity task
    /// (§4.7).
    pub fn verify_integrity(&self) -> Result<bool> {
        let rtx = self.db.begin_read().map_err(index_err)?;
        let manifests = rtx.open_table(MANIFESTS).map_err(index_err)?;
        let mut manifest_shard_counts = std::collections::HashMap::new();
        for row in manifests.iter().map_err(index_err)? {
            let (k, v) = row.map_err(index_err)?;
            let manifest: FileManifest = serde_json::from_str(v.value())?;
            manifest_shard_counts.insert(k.value().to_string(), manifest.total_shards());
        }

        let shards = rtx.open_table(SHARDS).map_err(index_err)?;
        for row in shards.iter().map_err(index_err)? {
            let (_, v) = row.map_err(index_err)?;
            let record: ShardRecord = serde_json::from_str(v.value())?;
            let file_key = record.file_fingerprint.to_string();
            match manifest_shard_counts.get(&file_key) {
                Some(&total) if record.shard_index < total => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

fn index_err(e: impl std::fmt::Display) -> Error {
    Error::Index(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fecmesh_common::config::ErasureConfig;
    use fecmesh_common::{time::now, LocalGroup};
    use std::collections::HashMap;

    fn sample_manifest() -> FileManifest {
        let ec = ErasureConfig::default();
        FileManifest {
            file_fingerprint: FileFingerprint::new(),
            owner: OwnerId::new(),
            logical_name: Some("report.pdf".to_string()),
            tags: vec!["finance".to_string()],
            original_size: 4096,
            original_sha256: [7u8; 32],
            data_shards: ec.data_shards,
            parity_shards: ec.parity_shards,
            chunk_size: 4096,
            algorithm: "rs+lrc".to_string(),
            local_groups: vec![LocalGroup {
                group_id: 0,
                shard_indices: vec![0, 1],
                local_recovery_index: 10,
            }],
            global_recovery_indices: vec![6, 7, 8, 9],
            chunk_hashes: HashMap::new(),
            created_at: now(),
            expires_at: now(),
        }
    }

    fn sample_shard(file: FileFingerprint, index: u16) -> ShardRecord {
        ShardRecord {
            file_fingerprint: file,
            shard_index: index,
            owner: OwnerId::new(),
            local_path: format!("{index}.shard"),
            sha256: [0u8; 32],
            kind: fecmesh_common::ShardKind::Data,
            size: 1024,
            stored_at: now(),
            expires_at: now(),
            last_accessed: now(),
            status: fecmesh_common::ShardStatus::Pending,
        }
    }

    fn sample_location(file: FileFingerprint, index: u16, peer: PeerId) -> LocationRecord {
        LocationRecord {
            file_fingerprint: file,
            shard_index: index,
            owner: OwnerId::new(),
            peer_id: peer,
            assigned_at: now(),
            confirmed_at: None,
            status: LocationStatus::Confirmed,
            attempts: 1,
            failure_reason: None,
        }
    }

    #[test]
    fn manifest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let manifest = sample_manifest();

        index.put_manifest(&manifest).unwrap();
        let fetched = index.get_manifest(&manifest.file_fingerprint).unwrap();
        assert_eq!(fetched.logical_name, manifest.logical_name);

        index.delete_manifest(&manifest.file_fingerprint).unwrap();
        assert!(index.get_manifest(&manifest.file_fingerprint).is_err());
    }

    #[test]
    fn list_manifests_for_owner_filters_by_owner() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let mine = sample_manifest();
        let mut other = sample_manifest();
        other.owner = OwnerId::new();

        index.put_manifest(&mine).unwrap();
        index.put_manifest(&other).unwrap();

        let owned = index.list_manifests_for_owner(&mine.owner).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].file_fingerprint, mine.file_fingerprint);
    }

    #[test]
    fn shard_and_location_prefix_scans_stay_scoped_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let file_a = FileFingerprint::new();
        let file_b = FileFingerprint::new();

        for i in 0..3u16 {
            index.put_shard(&sample_shard(file_a, i)).unwrap();
        }
        index.put_shard(&sample_shard(file_b, 0)).unwrap();

        let shards_a = index.list_shards_for_file(&file_a).unwrap();
        assert_eq!(shards_a.len(), 3);
        let shards_b = index.list_shards_for_file(&file_b).unwrap();
        assert_eq!(shards_b.len(), 1);
    }

    #[test]
    fn mark_peer_locations_failed_only_touches_that_peer() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let file = FileFingerprint::new();
        let flaky = PeerId::new("10.0.0.5:9101");
        let stable = PeerId::new("10.0.0.6:9101");

        index
            .put_location(&sample_location(file, 0, flaky.clone()))
            .unwrap();
        index
            .put_location(&sample_location(file, 1, stable.clone()))
            .unwrap();

        let touched = index.mark_peer_locations_failed(&flaky).unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].peer_id, flaky);

        let locations = index.list_locations_for_file(&file).unwrap();
        let stable_loc = locations.iter().find(|l| l.peer_id == stable).unwrap();
        assert_eq!(stable_loc.status, LocationStatus::Confirmed);
    }

    #[test]
    fn mark_peer_locations_failed_ignores_already_relocated_rows() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let file = FileFingerprint::new();
        let flaky = PeerId::new("10.0.0.5:9101");

        let mut relocated = sample_location(file, 0, flaky.clone());
        relocated.status = LocationStatus::Relocated;
        index.put_location(&relocated).unwrap();
        index
            .put_location(&sample_location(file, 1, flaky.clone()))
            .unwrap();

        // First disconnect: only the confirmed shard-1 location is touched.
        let touched = index.mark_peer_locations_failed(&flaky).unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].shard_index, 1);

        // Repeat disconnect/reconnect cycle: nothing left to re-flag, since
        // shard 1 is now Failed (not Confirmed) and shard 0 was already
        // Relocated before this peer ever came back.
        let touched_again = index.mark_peer_locations_failed(&flaky).unwrap();
        assert!(touched_again.is_empty());
    }

    #[test]
    fn peers_above_reliability_filters_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();

        index
            .upsert_peer(&PeerRecord {
                peer_id: PeerId::new("peer-a:9101"),
                host: "peer-a".to_string(),
                port: 9101,
                reliability: 0.9,
                shards_stored: 0,
                first_seen: now(),
                last_seen: now(),
                online: true,
                storage_available: None,
            })
            .unwrap();
        index
            .upsert_peer(&PeerRecord {
                peer_id: PeerId::new("peer-b:9101"),
                host: "peer-b".to_string(),
                port: 9101,
                reliability: 0.2,
                shards_stored: 0,
                first_seen: now(),
                last_seen: now(),
                online: true,
                storage_available: None,
            })
            .unwrap();

        let good = index.peers_above_reliability(0.5).unwrap();
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].peer_id.as_str(), "peer-a:9101");
    }

    #[test]
    fn set_peer_offline_and_reliability_delta() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let peer = PeerId::new("peer-c:9101");
        index
            .upsert_peer(&PeerRecord {
                peer_id: peer.clone(),
                host: "peer-c".to_string(),
                port: 9101,
                reliability: 0.8,
                shards_stored: 0,
                first_seen: now(),
                last_seen: now(),
                online: true,
                storage_available: None,
            })
            .unwrap();

        index.set_peer_offline(&peer).unwrap();
        index.update_peer_reliability(&peer, -0.1).unwrap();

        let updated = index.get_peer(&peer).unwrap().unwrap();
        assert!(!updated.online);
        assert!((updated.reliability - 0.7).abs() < 1e-9);
    }

    #[test]
    fn expired_shards_are_found_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let file = FileFingerprint::new();

        let mut expired = sample_shard(file, 0);
        expired.expires_at = fecmesh_common::time::Timestamp::from_offset_date_time(
            now().as_offset_date_time() - time::Duration::days(1),
        );
        index.put_shard(&expired).unwrap();

        let mut fresh = sample_shard(file, 1);
        fresh.expires_at = now().checked_add(std::time::Duration::from_secs(3600)).unwrap();
        index.put_shard(&fresh).unwrap();

        let found = index.expired_shards().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].shard_index, 0);

        let removed = index.cleanup_expired().unwrap();
        assert_eq!(removed, 1);
        assert!(index.get_shard(&file, 0).is_err());
        assert!(index.get_shard(&file, 1).is_ok());
    }

    #[test]
    fn confirm_location_stamps_confirmed_at() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let file = FileFingerprint::new();
        let peer = PeerId::new("peer-d:9101");

        let mut location = sample_location(file, 0, peer.clone());
        location.status = LocationStatus::Pending;
        location.confirmed_at = None;
        index.put_location(&location).unwrap();

        index.confirm_location(&file, 0, &peer).unwrap();

        let locations = index.list_locations_for_shard(&file, 0).unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].status, LocationStatus::Confirmed);
        assert!(locations[0].confirmed_at.is_some());
    }

    #[test]
    fn delete_file_rows_removes_shards_and_locations() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let file = FileFingerprint::new();
        let peer = PeerId::new("peer-e:9101");

        index.put_manifest(&{
            let mut m = sample_manifest();
            m.file_fingerprint = file;
            m
        }).unwrap();
        index.put_shard(&sample_shard(file, 0)).unwrap();
        index.put_location(&sample_location(file, 0, peer)).unwrap();

        index.delete_file_rows(&file).unwrap();

        assert!(index.get_manifest(&file).is_err());
        assert!(index.list_shards_for_file(&file).unwrap().is_empty());
        assert!(index.list_locations_for_file(&file).unwrap().is_empty());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let manifest = sample_manifest();

        let result: Result<()> = index.transaction(|tx| {
            let mut table = tx.open_table(MANIFESTS).map_err(index_err)?;
            let key = manifest.file_fingerprint.to_string();
            let json = serde_json::to_string(&manifest)?;
            table.insert(key.as_str(), json.as_str()).map_err(index_err)?;
            Err(Error::Internal("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(index.get_manifest(&manifest.file_fingerprint).is_err());
    }

    #[test]
    fn verify_integrity_detects_out_of_range_shard() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetaIndex::open(dir.path().join("meta.redb")).unwrap();
        let manifest = sample_manifest();
        index.put_manifest(&manifest).unwrap();
        assert!(index.verify_integrity().unwrap());

        let mut bogus = sample_shard(manifest.file_fingerprint, 999);
        bogus.file_fingerprint = manifest.file_fingerprint;
        index.put_shard(&bogus).unwrap();
        assert!(!index.verify_integrity().unwrap());
    }
}
