//! fecmesh-engine - chunking orchestrator, replication controller, and
//! background scheduler (C5/C6/C7).
//!
//! This crate owns the logic that sits between the wire protocol
//! (`fecmesh-rpc`) and the local storage/metadata layers
//! (`fecmesh-store`, `fecmesh-meta`, `fecmesh-erasure`): splitting
//! files into shards, dispersing them across the peer pool, recovering
//! from peer loss, and running the maintenance loops that keep a node
//! honest over time.

mod b64;
pub mod handler;
pub mod orchestrator;
pub mod replication;
pub mod scheduler;
pub mod selection;

pub use handler::ChunkServiceHandler;
pub use orchestrator::{ChunkingOrchestrator, DistributionReport, FileStatus};
pub use replication::ReplicationController;
pub use scheduler::BackgroundScheduler;
