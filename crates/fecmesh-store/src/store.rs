//! Content-addressed chunk store (C2).
//!
//! Shards are written atomically: the content lands in a temp file in
//! the shard's own directory, fsynced, then renamed into place, so a
//! reader never observes a partially written shard. A write-then-rename
//! discipline applied to plain files instead of raw block ranges.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fecmesh_common::{sha256_hex, Error, FileFingerprint, FileManifest, OwnerId, Result};
use rand::Rng;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::layout::ChunkLayout;

/// Lifetime throughput counters for a running store instance. These
/// only ever grow; they describe activity, not current occupancy, so
/// `stats()` does not derive storage totals from them (§4.2 wants a
/// snapshot of what's on disk *right now*, which a write/delete
/// counter pair can't give without double-bookkeeping every call
/// site).
#[derive(Debug, Default)]
pub struct StoreStats {
    pub shards_read: AtomicU64,
    pub bytes_read: AtomicU64,
    pub verification_failures: AtomicU64,
}

/// A snapshot combining the store's current on-disk totals with its
/// lifetime throughput counters, cheap enough to serialize for a
/// status endpoint or log line.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct StoreStatsSnapshot {
    pub chunk_count: u64,
    pub total_bytes: u64,
    pub shards_read: u64,
    pub bytes_read: u64,
    pub verification_failures: u64,
}

impl StoreStats {
    fn counters(&self) -> (u64, u64, u64) {
        (
            self.shards_read.load(Ordering::Relaxed),
            self.bytes_read.load(Ordering::Relaxed),
            self.verification_failures.load(Ordering::Relaxed),
        )
    }
}

/// Filesystem-backed store for erasure-coded shards.
#[derive(Clone)]
pub struct ChunkStore {
    layout: ChunkLayout,
    stats: Arc<StoreStats>,
}

impl ChunkStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub async fn open(root: impl Into<std::path::PathBuf>) -> Result<Self> {
        let layout = ChunkLayout::new(root);
        fs::create_dir_all(layout.root())
            .await
            .map_err(|e| Error::storage(format!("creating store root: {e}")))?;
        Ok(Self {
            layout,
            stats: Arc::new(StoreStats::default()),
        })
    }

    #[must_use]
    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Persist one shard's bytes, replacing any prior content at that
    /// index. Returns the shard's SHA-256 digest, computed once over
    /// the bytes as they are written.
    #[instrument(skip(self, data), fields(owner = %owner, file = %file, index))]
    pub async fn put(
        &self,
        owner: &OwnerId,
        file: &FileFingerprint,
        index: u16,
        data: &[u8],
    ) -> Result<[u8; 32]> {
        let dir = self.layout.file_dir(owner, file);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::storage(format!("creating shard dir: {e}")))?;

        let nonce: u32 = rand::thread_rng().gen();
        let temp_path = self.layout.temp_path(owner, file, index, nonce);
        let final_path = self.layout.shard_path(owner, file, index);

        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::storage(format!("creating temp shard: {e}")))?;
        f.write_all(data)
            .await
            .map_err(|e| Error::storage(format!("writing temp shard: {e}")))?;
        f.sync_all()
            .await
            .map_err(|e| Error::storage(format!("syncing temp shard: {e}")))?;
        drop(f);

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::storage(format!("renaming shard into place: {e}")));
        }

        let digest = fecmesh_common::checksum::sha256(data);
        debug!(digest = %sha256_hex(data), "stored shard");
        Ok(digest)
    }

    /// Read one shard's bytes back.
    #[instrument(skip(self), fields(owner = %owner, file = %file, index))]
    pub async fn get(
        &self,
        owner: &OwnerId,
        file: &FileFingerprint,
        index: u16,
    ) -> Result<Vec<u8>> {
        let path = self.layout.shard_path(owner, file, index);
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ShardNotFound {
                    file: file.to_string(),
                    index,
                    owner: owner.to_string(),
                }
            } else {
                Error::storage(format!("reading shard: {e}"))
            }
        })?;
        self.stats.shards_read.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_read
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data)
    }

    /// Write the file manifest to disk, alongside its shards. Same
    /// temp-file-then-rename discipline as a shard write, since a
    /// torn manifest would be just as dangerous as a torn shard.
    #[instrument(skip(self, manifest), fields(owner = %owner, file = %file))]
    pub async fn put_manifest(
        &self,
        owner: &OwnerId,
        file: &FileFingerprint,
        manifest: &FileManifest,
    ) -> Result<()> {
        let dir = self.layout.file_dir(owner, file);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::storage(format!("creating file dir: {e}")))?;

        let body = serde_json::to_vec_pretty(manifest)
            .map_err(|e| Error::storage(format!("encoding manifest: {e}")))?;

        let nonce: u32 = rand::thread_rng().gen();
        let temp_path = self.layout.manifest_temp_path(owner, file, nonce);
        let final_path = self.layout.manifest_path(owner, file);

        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::storage(format!("creating temp manifest: {e}")))?;
        f.write_all(&body)
            .await
            .map_err(|e| Error::storage(format!("writing temp manifest: {e}")))?;
        f.sync_all()
            .await
            .map_err(|e| Error::storage(format!("syncing temp manifest: {e}")))?;
        drop(f);

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::storage(format!("renaming manifest into place: {e}")));
        }
        debug!("stored manifest");
        Ok(())
    }

    /// Read the on-disk manifest for a file, if one has been written.
    pub async fn get_manifest(
        &self,
        owner: &OwnerId,
        file: &FileFingerprint,
    ) -> Result<FileManifest> {
        let path = self.layout.manifest_path(owner, file);
        let body = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ManifestNotFound(file.to_string())
            } else {
                Error::storage(format!("reading manifest: {e}"))
            }
        })?;
        serde_json::from_slice(&body).map_err(|e| Error::storage(format!("decoding manifest: {e}")))
    }

    /// Whether a file directory has a manifest written to disk. A file
    /// directory with shards but no manifest is an orphan of a
    /// `chunk_file` that crashed mid-distribution.
    pub async fn has_manifest(&self, owner: &OwnerId, file: &FileFingerprint) -> bool {
        fs::metadata(self.layout.manifest_path(owner, file))
            .await
            .is_ok()
    }

    /// Remove a single shard, tolerating a shard that is already gone.
    pub async fn delete(&self, owner: &OwnerId, file: &FileFingerprint, index: u16) -> Result<()> {
        let path = self.layout.shard_path(owner, file, index);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("deleting shard: {e}"))),
        }
    }

    /// Remove every shard belonging to a file, and the now-empty
    /// directory. Idempotent.
    pub async fn delete_file(&self, owner: &OwnerId, file: &FileFingerprint) -> Result<()> {
        let dir = self.layout.file_dir(owner, file);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("deleting file directory: {e}"))),
        }
    }

    /// Compute the SHA-256 digest of a stored shard without returning
    /// its bytes.
    pub async fn hash(&self, owner: &OwnerId, file: &FileFingerprint, index: u16) -> Result<[u8; 32]> {
        let data = self.get(owner, file, index).await?;
        Ok(fecmesh_common::checksum::sha256(&data))
    }

    /// Verify a stored shard's digest against an expected value.
    pub async fn verify(
        &self,
        owner: &OwnerId,
        file: &FileFingerprint,
        index: u16,
        expected: &[u8; 32],
    ) -> Result<bool> {
        let actual = self.hash(owner, file, index).await?;
        let ok = &actual == expected;
        if !ok {
            self.stats
                .verification_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(owner = %owner, file = %file, index, "shard failed integrity verification");
        }
        Ok(ok)
    }

    /// A snapshot of what's currently on disk — shard count and total
    /// bytes, walked fresh each call rather than tracked by a
    /// write/delete counter pair that would need updating at every
    /// removal path (`delete`, `delete_file`, `cleanup_orphans`) to
    /// stay correct.
    pub async fn stats(&self) -> Result<StoreStatsSnapshot> {
        let (chunk_count, total_bytes) = self.walk_totals().await?;
        let (shards_read, bytes_read, verification_failures) = self.stats.counters();
        Ok(StoreStatsSnapshot {
            chunk_count,
            total_bytes,
            shards_read,
            bytes_read,
            verification_failures,
        })
    }

    async fn walk_totals(&self) -> Result<(u64, u64)> {
        let mut chunk_count = 0u64;
        let mut total_bytes = 0u64;
        let mut owners = match fs::read_dir(self.layout.root()).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(Error::storage(format!("scanning store root: {e}"))),
        };

        while let Some(owner_entry) = owners
            .next_entry()
            .await
            .map_err(|e| Error::storage(format!("scanning store root: {e}")))?
        {
            let mut files = match fs::read_dir(owner_entry.path()).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Some(file_entry) = files
                .next_entry()
                .await
                .map_err(|e| Error::storage(format!("scanning owner dir: {e}")))?
            {
                let mut shards = match fs::read_dir(file_entry.path()).await {
                    Ok(rd) => rd,
                    Err(_) => continue,
                };
                while let Some(shard_entry) = shards
                    .next_entry()
                    .await
                    .map_err(|e| Error::storage(format!("scanning file dir: {e}")))?
                {
                    let name = shard_entry.file_name();
                    let name = name.to_string_lossy();
                    if !name.ends_with(&format!(".{}", crate::layout::SHARD_EXTENSION)) {
                        continue;
                    }
                    let Ok(metadata) = shard_entry.metadata().await else {
                        continue;
                    };
                    chunk_count += 1;
                    total_bytes += metadata.len();
                }
            }
        }
        Ok((chunk_count, total_bytes))
    }

    /// Scan the store for file directories that are not present in
    /// `live`, removing them. Returns how many were removed. Used by
    /// the replication controller's retention sweep (§4.6) to reclaim
    /// shards for files the metadata index no longer tracks.
    pub async fn cleanup_orphans(
        &self,
        live: &HashSet<(OwnerId, FileFingerprint)>,
    ) -> Result<usize> {
        let mut removed = 0usize;
        let mut owners = match fs::read_dir(self.layout.root()).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::storage(format!("scanning store root: {e}"))),
        };

        while let Some(owner_entry) = owners
            .next_entry()
            .await
            .map_err(|e| Error::storage(format!("scanning store root: {e}")))?
        {
            let Ok(owner_id) = owner_entry.file_name().to_string_lossy().parse() else {
                continue;
            };
            let owner = OwnerId::from_uuid(owner_id);

            let mut files = fs::read_dir(owner_entry.path())
                .await
                .map_err(|e| Error::storage(format!("scanning owner dir: {e}")))?;
            while let Some(file_entry) = files
                .next_entry()
                .await
                .map_err(|e| Error::storage(format!("scanning owner dir: {e}")))?
            {
                let Ok(file_id) = file_entry.file_name().to_string_lossy().parse() else {
                    continue;
                };
                let file = FileFingerprint::from_uuid(file_id);
                let is_live = live.contains(&(owner.clone(), file));
                let has_manifest = self.has_manifest(&owner, &file).await;
                if !is_live || !has_manifest {
                    if fs::remove_dir_all(file_entry.path()).await.is_ok() {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        let owner = OwnerId::new();
        let file = FileFingerprint::new();

        let digest = store.put(&owner, &file, 0, b"shard bytes").await.unwrap();
        let read_back = store.get(&owner, &file, 0).await.unwrap();
        assert_eq!(read_back, b"shard bytes");
        assert_eq!(digest, fecmesh_common::checksum::sha256(b"shard bytes"));
    }

    #[tokio::test]
    async fn stats_reflects_current_storage_not_lifetime_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        let owner = OwnerId::new();
        let file = FileFingerprint::new();

        store.put(&owner, &file, 0, b"shard bytes").await.unwrap();
        store.put(&owner, &file, 1, b"more shard bytes").await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.total_bytes, b"shard bytes".len() as u64 + b"more shard bytes".len() as u64);

        store.delete(&owner, &file, 1).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.total_bytes, b"shard bytes".len() as u64);
    }

    #[tokio::test]
    async fn get_missing_shard_errors_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        let owner = OwnerId::new();
        let file = FileFingerprint::new();

        let err = store.get(&owner, &file, 0).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn verify_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        let owner = OwnerId::new();
        let file = FileFingerprint::new();

        let digest = store.put(&owner, &file, 0, b"original").await.unwrap();
        assert!(store.verify(&owner, &file, 0, &digest).await.unwrap());

        store.put(&owner, &file, 0, b"corrupted").await.unwrap();
        assert!(!store.verify(&owner, &file, 0, &digest).await.unwrap());
    }

    #[tokio::test]
    async fn delete_file_removes_every_shard() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        let owner = OwnerId::new();
        let file = FileFingerprint::new();

        for i in 0..4u16 {
            store.put(&owner, &file, i, b"x").await.unwrap();
        }
        store.delete_file(&owner, &file).await.unwrap();
        let err = store.get(&owner, &file, 0).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cleanup_orphans_removes_untracked_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        let owner = OwnerId::new();
        let kept = FileFingerprint::new();
        let orphaned = FileFingerprint::new();

        store.put(&owner, &kept, 0, b"x").await.unwrap();
        store.put_manifest(&owner, &kept, &sample_manifest(&owner, kept))
            .await
            .unwrap();
        store.put(&owner, &orphaned, 0, b"x").await.unwrap();

        let mut live = HashSet::new();
        live.insert((owner.clone(), kept));
        let removed = store.cleanup_orphans(&live).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&owner, &kept, 0).await.is_ok());
        assert!(store.get(&owner, &orphaned, 0).await.is_err());
    }

    #[tokio::test]
    async fn cleanup_orphans_removes_manifestless_file_even_if_live() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        let owner = OwnerId::new();
        let crashed = FileFingerprint::new();

        store.put(&owner, &crashed, 0, b"x").await.unwrap();

        let mut live = HashSet::new();
        live.insert((owner.clone(), crashed));
        let removed = store.cleanup_orphans(&live).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&owner, &crashed, 0).await.is_err());
    }

    #[tokio::test]
    async fn manifest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        let owner = OwnerId::new();
        let file = FileFingerprint::new();
        let manifest = sample_manifest(&owner, file);

        assert!(!store.has_manifest(&owner, &file).await);
        store.put_manifest(&owner, &file, &manifest).await.unwrap();
        assert!(store.has_manifest(&owner, &file).await);

        let read_back = store.get_manifest(&owner, &file).await.unwrap();
        assert_eq!(read_back.file_fingerprint, manifest.file_fingerprint);
        assert_eq!(read_back.original_size, manifest.original_size);
    }

    #[tokio::test]
    async fn get_manifest_missing_errors_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).await.unwrap();
        let owner = OwnerId::new();
        let file = FileFingerprint::new();

        let err = store.get_manifest(&owner, &file).await.unwrap_err();
        assert!(err.is_not_found());
    }

    fn sample_manifest(owner: &OwnerId, file: FileFingerprint) -> FileManifest {
        FileManifest {
            file_fingerprint: file,
            owner: owner.clone(),
            logical_name: Some("report.pdf".into()),
            tags: vec![],
            original_size: 1024,
            original_sha256: fecmesh_common::checksum::sha256(b"contents"),
            data_shards: 4,
            parity_shards: 2,
            chunk_size: 256,
            algorithm: "rs+lrc".into(),
            local_groups: vec![],
            global_recovery_indices: vec![],
            chunk_hashes: Default::default(),
            created_at: fecmesh_common::time::now(),
            expires_at: fecmesh_common::time::now(),
        }
    }
}
