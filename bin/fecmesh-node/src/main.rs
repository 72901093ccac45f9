//! fecmesh-node - peer node daemon
//!
//! Hosts a chunk store and metadata index behind the peer RPC server
//! (C4), runs the chunking orchestrator (C5) and replication
//! controller (C6) for the files this node owns, and keeps the
//! background scheduler (C7) running for retention GC, integrity
//! checks, and relocation draining.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use clap::{Parser, Subcommand};
use fecmesh_common::config::Config;
use fecmesh_common::{FileFingerprint, OwnerId};
use fecmesh_engine::{BackgroundScheduler, ChunkServiceHandler, ChunkingOrchestrator, ReplicationController};
use fecmesh_meta::MetaIndex;
use fecmesh_rpc::oracle::StaticOracle;
use fecmesh_rpc::{RpcClient, RpcServer};
use fecmesh_store::ChunkStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "fecmesh-node")]
#[command(about = "fecmesh peer storage node")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML). Skipped silently if absent.
    #[arg(short, long, default_value = "/etc/fecmesh/node.toml", global = true)]
    config: PathBuf,

    /// Listen address for the peer RPC server.
    #[arg(short, long, env = "FECMESH_LISTEN", global = true)]
    listen: Option<String>,

    /// Data directory (shards + metadata index live under this root).
    #[arg(long, env = "FECMESH_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Log level, e.g. info, debug, trace.
    #[arg(long, env = "FECMESH_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Prometheus metrics port.
    #[arg(long, env = "FECMESH_METRICS_PORT", default_value = "9102")]
    metrics_port: u16,

    /// Peers known at startup, as `peer-id=host:port` (repeatable).
    /// Real peer discovery (C4/C5 Non-goal: no dedicated directory
    /// service) happens by the node learning addresses from manifests
    /// and RPC traffic; this seeds the `StaticOracle` for a cold start.
    #[arg(long = "peer", global = true)]
    peers: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// The core operations §2 exposes to external collaborators
/// (chunk/distribute/reconstruct/delete over file identifiers), driven
/// directly against this node's own store and metadata index rather
/// than over the peer wire protocol. With no subcommand, the binary
/// runs the daemon (RPC server + background scheduler) instead.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the peer daemon: RPC server, background scheduler, metrics.
    Serve,
    /// Split a local file into shards and commit its manifest.
    Chunk {
        /// Path to the file to chunk.
        path: PathBuf,
        /// Owner UUID; a fresh one is minted if omitted.
        #[arg(long)]
        owner: Option<String>,
        /// Logical name recorded on the manifest.
        #[arg(long)]
        name: Option<String>,
        /// Remove the source file once all shards are written.
        #[arg(long)]
        delete_source: bool,
    },
    /// Disperse a chunked file's shards across known peers.
    Distribute {
        /// File fingerprint (UUID) returned by `chunk`.
        file: String,
        #[arg(long)]
        owner: String,
        /// Keep the local shard copy after a peer confirms receipt.
        #[arg(long)]
        keep_local: bool,
    },
    /// Reconstruct a file from local and/or remote shards.
    Reconstruct {
        file: String,
        #[arg(long)]
        owner: String,
        /// Write the reconstructed bytes here instead of only reporting size.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete a file's shards and metadata rows.
    Delete {
        file: String,
        #[arg(long)]
        owner: String,
    },
    /// Print chunking/distribution status for a file.
    Status { file: String },
    /// List known peers and their reliability scores.
    Peers,
    /// List shards with too few confirmed replicas or an unreliable host.
    AtRisk {
        #[arg(long)]
        owner: String,
    },
}

fn parse_fingerprint(s: &str) -> Result<FileFingerprint> {
    Ok(FileFingerprint::from_uuid(
        Uuid::parse_str(s).with_context(|| format!("invalid file fingerprint {s}"))?,
    ))
}

fn parse_owner(s: &str) -> Result<OwnerId> {
    Ok(OwnerId::from_uuid(
        Uuid::parse_str(s).with_context(|| format!("invalid owner id {s}"))?,
    ))
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if args.config.exists() {
        let raw = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading config file {}", args.config.display()))?;
        toml::from_str(&raw).unwrap_or_else(|e| {
            eprintln!("warning: failed to parse {}: {e}, using defaults", args.config.display());
            Config::default()
        })
    } else {
        Config::default()
    };

    if let Some(listen) = &args.listen {
        config.network.listen = listen.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.node.data_dir = data_dir.clone();
        config.storage.root = data_dir.join("shards");
    }
    Ok(config)
}

fn parse_peer_seeds(peers: &[String]) -> Vec<(fecmesh_common::PeerId, String, u16)> {
    let mut parsed = Vec::new();
    for entry in peers {
        let Some((id, addr)) = entry.split_once('=') else {
            eprintln!("warning: ignoring malformed --peer {entry} (expected id=host:port)");
            continue;
        };
        let Some((host, port)) = addr.rsplit_once(':') else {
            eprintln!("warning: ignoring malformed --peer address {addr}");
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            eprintln!("warning: ignoring malformed --peer port {port}");
            continue;
        };
        parsed.push((fecmesh_common::PeerId::new(id), host.to_string(), port));
    }
    parsed
}

#[derive(Clone)]
struct MetricsState {
    handle: metrics_exporter_prometheus::PrometheusHandle,
    peer_uuid: String,
    start: std::time::Instant,
}

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    let mut output = state.handle.render();
    let _ = writeln!(
        output,
        "fecmesh_uptime_seconds{{peer_uuid=\"{}\"}} {}",
        state.peer_uuid,
        state.start.elapsed().as_secs()
    );
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn start_metrics_server(port: u16, state: MetricsState) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Shared node handles a `Commands` arm needs: the store, metadata
/// index, and an RPC client seeded with the `--peer` oracle. The daemon
/// additionally stands up the RPC server, scheduler, and metrics
/// listener on top of the same handles.
struct NodeHandles {
    config: Config,
    peer_uuid: Uuid,
    store: ChunkStore,
    meta: Arc<MetaIndex>,
    rpc_client: Arc<RpcClient>,
}

async fn open_node(args: &Args) -> Result<NodeHandles> {
    let config = load_config(args)?;
    let peer_uuid = Uuid::new_v4();
    std::fs::create_dir_all(&config.node.data_dir)
        .with_context(|| format!("creating data dir {}", config.node.data_dir.display()))?;

    let store = ChunkStore::open(&config.storage.root)
        .await
        .context("opening chunk store")?;
    let meta = Arc::new(
        MetaIndex::open(config.node.data_dir.join("meta.redb")).context("opening metadata index")?,
    );

    let oracle = Arc::new(StaticOracle::new());
    for (peer_id, host, port) in parse_peer_seeds(&args.peers) {
        oracle.insert(peer_id, host, port);
    }
    let rpc_client = Arc::new(RpcClient::new(oracle, config.network.clone(), peer_uuid));

    Ok(NodeHandles {
        config,
        peer_uuid,
        store,
        meta,
        rpc_client,
    })
}

/// Run a single chunk/distribute/reconstruct/delete/status/peers/
/// at-risk operation against this node's local state and exit. No RPC
/// server, scheduler, or metrics listener is started for these.
async fn run_command(args: &Args, command: Commands) -> Result<()> {
    let handles = open_node(args).await?;
    let orchestrator = ChunkingOrchestrator::new(
        handles.config.clone(),
        handles.store.clone(),
        handles.meta.clone(),
        handles.rpc_client.clone(),
    )
    .context("building chunking orchestrator")?;

    match command {
        Commands::Serve => unreachable!("Serve is handled by run_serve"),
        Commands::Chunk { path, owner, name, delete_source } => {
            let owner = match owner {
                Some(o) => parse_owner(&o)?,
                None => OwnerId::new(),
            };
            let data = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let manifest = orchestrator.chunk_file(owner, name, vec![], &data).await?;
            if delete_source {
                std::fs::remove_file(&path)
                    .with_context(|| format!("removing source {}", path.display()))?;
            }
            println!("file_fingerprint: {}", manifest.file_fingerprint);
            println!("owner: {owner}");
            println!(
                "shards: {} data, {} parity, {} local-recovery",
                manifest.data_shards,
                manifest.parity_shards,
                manifest.local_groups.len()
            );
        }
        Commands::Distribute { file, owner, keep_local } => {
            let file = parse_fingerprint(&file)?;
            let owner = parse_owner(&owner)?;
            let report = orchestrator.distribute_chunks(owner, file, !keep_local).await?;
            println!(
                "assigned: {}, confirmed: {}, failed: {}, local_deleted: {}",
                report.assigned,
                report.confirmed,
                report.failed.len(),
                report.local_deleted
            );
            for (index, reason) in &report.failed {
                println!("  shard {index} failed: {reason}");
            }
        }
        Commands::Reconstruct { file, owner, output } => {
            let file = parse_fingerprint(&file)?;
            let owner = parse_owner(&owner)?;
            let bytes = orchestrator.reconstruct_file(owner, file).await?;
            if let Some(path) = &output {
                std::fs::write(path, &bytes)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("wrote {} bytes to {}", bytes.len(), path.display());
            } else {
                println!("reconstructed {} bytes", bytes.len());
            }
        }
        Commands::Delete { file, owner } => {
            let file = parse_fingerprint(&file)?;
            let owner = parse_owner(&owner)?;
            orchestrator.delete_file(owner, file).await?;
            println!("deleted {file}");
        }
        Commands::Status { file } => {
            let file = parse_fingerprint(&file)?;
            let status = orchestrator.file_status(file)?;
            println!(
                "chunked: {}, distributed: {}, reconstructable: {}, distribution: {:.1}%",
                status.chunked, status.distributed, status.reconstructable, status.distribution_pct
            );
        }
        Commands::Peers => {
            for peer in handles.meta.list_peers()? {
                println!(
                    "{} ({}:{}) reliability={:.2} online={} shards={}",
                    peer.peer_id, peer.host, peer.port, peer.reliability, peer.online, peer.shards_stored
                );
            }
        }
        Commands::AtRisk { owner } => {
            let owner = parse_owner(&owner)?;
            let replication = ReplicationController::new(
                handles.config.replication.clone(),
                handles.config.network.min_reliability_score,
                handles.store.clone(),
                handles.meta.clone(),
                handles.rpc_client.clone(),
            );
            for risk in replication.chunks_at_risk(&owner)? {
                println!(
                    "{} shard {} replicas={} min_reliability={:.2}",
                    risk.file_fingerprint, risk.shard_index, risk.replica_count, risk.min_reliability
                );
            }
        }
    }
    Ok(())
}

async fn run_serve(args: &Args) -> Result<()> {
    let handles = open_node(args).await?;
    let NodeHandles { config, peer_uuid, store, meta, rpc_client } = handles;

    info!(node = %config.node.name, "starting fecmesh node");

    let active_connections = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let handler = Arc::new(ChunkServiceHandler::new(
        store.clone(),
        meta.clone(),
        peer_uuid,
        active_connections.clone(),
    ));
    let rpc_server = RpcServer::bind(config.network.clone(), handler, peer_uuid, active_connections)
        .await
        .context("binding rpc server")?;
    info!(addr = ?rpc_server.local_addr()?, "rpc server bound");

    let replication = Arc::new(ReplicationController::new(
        config.replication.clone(),
        config.network.min_reliability_score,
        store.clone(),
        meta.clone(),
        rpc_client.clone(),
    ));

    let scheduler = BackgroundScheduler::new(
        config.replication.cleanup_interval_hours,
        config.replication.integrity_check_interval_hours,
        meta.clone(),
        replication.clone(),
    );
    let scheduler_handles = scheduler.spawn();

    let recorder_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")?;
    let metrics_state = MetricsState {
        handle: recorder_handle,
        peer_uuid: peer_uuid.to_string(),
        start: std::time::Instant::now(),
    };
    let metrics_port = args.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_port, metrics_state).await {
            error!(error = %e, "metrics server error");
        }
    });

    let shutdown = CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        shutdown_for_signal.cancel();
    });

    rpc_server.serve(shutdown.clone()).await;

    scheduler.shutdown();
    for handle in scheduler_handles {
        let _ = handle.await;
    }

    info!("fecmesh node shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fecmesh_node=info".into())
                .add_directive(args.log_level.parse().unwrap_or_else(|_| "info".parse().unwrap())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        None | Some(Commands::Serve) => run_serve(&args).await,
        Some(command) => run_command(&args, command).await,
    }
}
