//! Background scheduler (C7): the cooperative timer loops that keep a
//! node healthy without an operator driving it (§4.7).
//!
//! Grounded in `original_source/chunking/replication_mgr.py`'s
//! `start_background_tasks` (three asyncio loops: cleanup, integrity
//! check, replication drain), rebuilt in the idiomatic Rust shape
//! `objectio-osd::scavenger` uses: one `CancellationToken` owned per
//! scheduler instance (not a process-global), `tokio::select!` racing
//! the timer against shutdown, tasks returned as `JoinHandle`s the
//! caller can await.

use std::sync::Arc;
use std::time::Duration;

use fecmesh_meta::MetaIndex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::replication::ReplicationController;

/// Cadence between replication-task drain passes. Deliberately much
/// shorter than the hourly/6-hourly maintenance loops: relocations
/// should not sit queued for long after a peer drops.
const REPLICATION_DRAIN_INTERVAL: Duration = Duration::from_secs(30);

/// Owns the three recurring maintenance loops for one node.
pub struct BackgroundScheduler {
    cleanup_interval: Duration,
    integrity_check_interval: Duration,
    meta: Arc<MetaIndex>,
    replication: Arc<ReplicationController>,
    shutdown: CancellationToken,
}

impl BackgroundScheduler {
    pub fn new(
        cleanup_interval_hours: u64,
        integrity_check_interval_hours: u64,
        meta: Arc<MetaIndex>,
        replication: Arc<ReplicationController>,
    ) -> Self {
        Self {
            cleanup_interval: Duration::from_secs(cleanup_interval_hours.max(1) * 3600),
            integrity_check_interval: Duration::from_secs(integrity_check_interval_hours.max(1) * 3600),
            meta,
            replication,
            shutdown: CancellationToken::new(),
        }
    }

    /// Clone of the cancellation token so a caller can trigger shutdown
    /// without holding on to the scheduler itself.
    #[must_use]
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Spawn the three loops and return their handles for the caller
    /// to join on graceful shutdown.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Self::cleanup_loop(
                self.replication.clone(),
                self.cleanup_interval,
                self.shutdown.clone(),
            )),
            tokio::spawn(Self::integrity_check_loop(
                self.meta.clone(),
                self.integrity_check_interval,
                self.shutdown.clone(),
            )),
            tokio::spawn(Self::replication_drain_loop(
                self.replication.clone(),
                self.shutdown.clone(),
            )),
        ]
    }

    async fn cleanup_loop(
        replication: Arc<ReplicationController>,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("cleanup loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    match replication.cleanup_expired().await {
                        Ok(removed) => info!(removed, "retention cleanup pass complete"),
                        Err(e) => error!(error = %e, "retention cleanup pass failed"),
                    }
                }
            }
        }
    }

    async fn integrity_check_loop(meta: Arc<MetaIndex>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("integrity check loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    match meta.verify_integrity() {
                        Ok(true) => info!("metadata integrity check passed"),
                        Ok(false) => warn!("metadata integrity check found inconsistencies"),
                        Err(e) => error!(error = %e, "metadata integrity check failed"),
                    }
                }
            }
        }
    }

    async fn replication_drain_loop(replication: Arc<ReplicationController>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(REPLICATION_DRAIN_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("replication drain loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    match replication.drain_pending().await {
                        Ok(0) => {}
                        Ok(n) => info!(tasks = n, "drained pending relocation tasks"),
                        Err(e) => error!(error = %e, "replication drain pass failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fecmesh_common::config::{NetworkConfig, ReplicationConfig};
    use fecmesh_rpc::oracle::NullOracle;
    use fecmesh_rpc::RpcClient;
    use fecmesh_store::ChunkStore;

    #[tokio::test]
    async fn shutdown_stops_all_loops_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path().join("shards")).await.unwrap();
        let meta = Arc::new(MetaIndex::open(dir.path().join("meta.redb")).unwrap());
        let rpc = Arc::new(RpcClient::new(
            Arc::new(NullOracle),
            NetworkConfig::default(),
            uuid::Uuid::new_v4(),
        ));
        let replication = Arc::new(ReplicationController::new(
            ReplicationConfig::default(),
            0.5,
            store,
            meta.clone(),
            rpc,
        ));
        let scheduler = BackgroundScheduler::new(6, 1, meta, replication);
        let handles = scheduler.spawn();
        scheduler.shutdown();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("loop did not shut down promptly")
                .unwrap();
        }
    }
}
