//! Peer RPC server, per §4.4.
//!
//! Inbound connections are serviced one request/response at a time; a
//! per-connection inactivity timeout bounds how long the server waits
//! for the request frame. Concurrent connections are bounded by a
//! semaphore sized to `NetworkConfig::max_connections`; once it is
//! exhausted, further accepted sockets simply wait for a permit (the
//! OS backlog absorbs anything beyond that), matching §4.4's "queued
//! at the OS level until capacity frees".

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use fecmesh_common::config::NetworkConfig;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::methods::{
    AnnounceFileRequest, DeleteChunkRequest, GetChunkInfoRequest, GetChunkRequest,
    ListChunksRequest, PingRequest, PingResponse, SearchFileRequest, StoreChunkRequest,
    METHOD_ANNOUNCE_FILE, METHOD_DELETE_CHUNK, METHOD_GET_CHUNK, METHOD_GET_CHUNK_INFO,
    METHOD_GET_STATS, METHOD_LIST_CHUNKS, METHOD_PING, METHOD_SEARCH_FILE, METHOD_STORE_CHUNK,
};
use crate::wire::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::RpcError;

/// Implemented by the node service (`bin/fecmesh-node`), which owns
/// the chunk store and metadata index this server dispatches into.
/// Kept as a trait so `fecmesh-rpc` never depends on storage/metadata
/// crates directly.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn store_chunk(&self, req: StoreChunkRequest) -> Result<Value, RpcError>;
    async fn get_chunk(&self, req: GetChunkRequest) -> Result<Value, RpcError>;
    async fn delete_chunk(&self, req: DeleteChunkRequest) -> Result<Value, RpcError>;
    async fn get_chunk_info(&self, req: GetChunkInfoRequest) -> Result<Value, RpcError>;
    async fn list_chunks(&self, req: ListChunksRequest) -> Result<Value, RpcError>;
    async fn get_stats(&self) -> Result<Value, RpcError>;
    async fn announce_file(&self, req: AnnounceFileRequest) -> Result<Value, RpcError>;
    async fn search_file(&self, req: SearchFileRequest) -> Result<Value, RpcError>;
}

/// Length-prefixed JSON-RPC server.
pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<dyn RpcHandler>,
    config: NetworkConfig,
    peer_uuid: Uuid,
    started_at: Instant,
    active_connections: Arc<AtomicUsize>,
}

impl RpcServer {
    /// `active_connections` is typically shared with whatever built
    /// `handler`, so the handler's own `get_stats` can report the same
    /// live count this server maintains rather than a second, separate
    /// counter. Pass a fresh `Arc::new(AtomicUsize::new(0))` if nothing
    /// else needs to observe it.
    pub async fn bind(
        config: NetworkConfig,
        handler: Arc<dyn RpcHandler>,
        peer_uuid: Uuid,
        active_connections: Arc<AtomicUsize>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        info!(addr = %config.listen, "rpc server listening");
        Ok(Self {
            listener,
            handler,
            config,
            peer_uuid,
            started_at: Instant::now(),
            active_connections,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled. Each
    /// connection is serviced by its own task and handles exactly one
    /// request/response before closing, per §4.4.
    pub async fn serve(self, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("rpc server shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let permit = semaphore.clone().acquire_owned().await;
                    let Ok(permit) = permit else { continue };
                    let handler = self.handler.clone();
                    let max_message_size = self.config.max_message_size;
                    let inactivity_timeout =
                        std::time::Duration::from_secs(self.config.rpc_timeout_seconds);
                    let peer_uuid = self.peer_uuid;
                    let active = self.active_connections.clone();
                    active.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = handle_connection(
                            stream,
                            handler,
                            max_message_size,
                            inactivity_timeout,
                            peer_uuid,
                        )
                        .await
                        {
                            debug!(peer = %addr, error = %e, "connection ended with error");
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }
    }

    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    handler: Arc<dyn RpcHandler>,
    max_message_size: usize,
    inactivity_timeout: std::time::Duration,
    peer_uuid: Uuid,
) -> std::io::Result<()> {
    let body = tokio::time::timeout(inactivity_timeout, read_frame(&mut stream, max_message_size))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "inactivity timeout"))??;

    let response = match serde_json::from_slice::<RpcRequest>(&body) {
        Ok(request) => dispatch(request, handler.as_ref(), peer_uuid).await,
        Err(e) => RpcResponse::err("null", RpcError::parse_error(e.to_string())),
    };

    let response_body = serde_json::to_vec(&response)
        .unwrap_or_else(|_| br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"internal"},"id":"null"}"#.to_vec());
    write_frame(&mut stream, &response_body).await
}

async fn dispatch(request: RpcRequest, handler: &dyn RpcHandler, peer_uuid: Uuid) -> RpcResponse {
    let id = request.id.clone();
    let result = dispatch_method(&request, handler, peer_uuid).await;
    match result {
        Ok(value) => RpcResponse::ok(id, value),
        Err(e) => {
            error!(method = %request.method, error = %e, "rpc handler error");
            RpcResponse::err(id, e)
        }
    }
}

async fn dispatch_method(
    request: &RpcRequest,
    handler: &dyn RpcHandler,
    peer_uuid: Uuid,
) -> Result<Value, RpcError> {
    let params = request.params.clone();
    let parse = |p: Value| -> Result<_, RpcError> {
        serde_json::from_value(p).map_err(|e| RpcError::invalid_request(e.to_string()))
    };

    match request.method.as_str() {
        METHOD_PING => {
            let req: PingRequest = parse(params)?;
            let resp = PingResponse {
                pong: true,
                peer_uuid: peer_uuid.to_string(),
                timestamp: req.timestamp.clone(),
                received_timestamp: fecmesh_common::time::now().to_iso8601(),
            };
            Ok(serde_json::to_value(resp).unwrap())
        }
        METHOD_STORE_CHUNK => handler.store_chunk(parse(params)?).await,
        METHOD_GET_CHUNK => handler.get_chunk(parse(params)?).await,
        METHOD_DELETE_CHUNK => handler.delete_chunk(parse(params)?).await,
        METHOD_GET_CHUNK_INFO => handler.get_chunk_info(parse(params)?).await,
        METHOD_LIST_CHUNKS => handler.list_chunks(parse(params)?).await,
        METHOD_GET_STATS => handler.get_stats().await,
        METHOD_ANNOUNCE_FILE => handler.announce_file(parse(params)?).await,
        METHOD_SEARCH_FILE => handler.search_file(parse(params)?).await,
        other => Err(RpcError::method_not_found(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use crate::oracle::NullOracle;
    use fecmesh_common::PeerId;
    use std::sync::Mutex as StdMutex;

    struct EchoHandler {
        stored: StdMutex<Vec<StoreChunkRequest>>,
    }

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn store_chunk(&self, req: StoreChunkRequest) -> Result<Value, RpcError> {
            self.stored.lock().unwrap().push(req);
            Ok(serde_json::json!({
                "success": true,
                "stored_at": fecmesh_common::time::now().to_iso8601(),
                "expires_at": fecmesh_common::time::now().to_iso8601(),
            }))
        }
        async fn get_chunk(&self, _req: GetChunkRequest) -> Result<Value, RpcError> {
            Err(RpcError::chunk_not_found("not stored in this test"))
        }
        async fn delete_chunk(&self, _req: DeleteChunkRequest) -> Result<Value, RpcError> {
            Ok(serde_json::json!({"success": true, "deleted": true}))
        }
        async fn get_chunk_info(&self, _req: GetChunkInfoRequest) -> Result<Value, RpcError> {
            Ok(serde_json::json!({"exists": false}))
        }
        async fn list_chunks(&self, _req: ListChunksRequest) -> Result<Value, RpcError> {
            Ok(serde_json::json!({"chunks": [], "total_size": 0, "count": 0}))
        }
        async fn get_stats(&self) -> Result<Value, RpcError> {
            Ok(serde_json::json!({
                "peer_uuid": Uuid::new_v4().to_string(),
                "chunks_stored": 0,
                "total_size_bytes": 0,
                "uptime_seconds": 0,
                "active_connections": 0,
            }))
        }
        async fn announce_file(&self, _req: AnnounceFileRequest) -> Result<Value, RpcError> {
            Ok(serde_json::json!({"success": true, "indexed": true}))
        }
        async fn search_file(&self, _req: SearchFileRequest) -> Result<Value, RpcError> {
            Ok(serde_json::json!({"found": false}))
        }
    }

    #[tokio::test]
    async fn ping_round_trips_over_loopback() {
        let mut config = NetworkConfig::default();
        config.listen = "127.0.0.1:0".to_string();
        let handler = Arc::new(EchoHandler { stored: StdMutex::new(Vec::new()) });
        let server = RpcServer::bind(config.clone(), handler, Uuid::new_v4(), Arc::new(AtomicUsize::new(0)))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let join = tokio::spawn(server.serve(shutdown_clone));

        let client_config = NetworkConfig { listen: addr.to_string(), ..config };
        let client = RpcClient::new(Arc::new(NullOracle), client_config, Uuid::new_v4());
        let peer = PeerId::new(addr.to_string());

        let resp = client.ping(&peer).await.unwrap();
        assert!(resp.pong);

        shutdown.cancel();
        let _ = join.await;
    }

    #[tokio::test]
    async fn store_chunk_reaches_handler_over_loopback() {
        let mut config = NetworkConfig::default();
        config.listen = "127.0.0.1:0".to_string();
        let handler = Arc::new(EchoHandler { stored: StdMutex::new(Vec::new()) });
        let server = RpcServer::bind(
            config.clone(),
            handler.clone(),
            Uuid::new_v4(),
            Arc::new(AtomicUsize::new(0)),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let join = tokio::spawn(server.serve(shutdown_clone));

        let client_config = NetworkConfig { listen: addr.to_string(), ..config };
        let client = RpcClient::new(Arc::new(NullOracle), client_config, Uuid::new_v4());
        let peer = PeerId::new(addr.to_string());

        let req = StoreChunkRequest {
            file: "file-1".to_string(),
            index: 0,
            owner: "owner-1".to_string(),
            chunk_b64: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"hello"),
            content_hash: fecmesh_common::sha256_hex(b"hello"),
            chunk_size: 5,
        };
        let resp = client.store_chunk(&peer, req).await.unwrap();
        assert!(resp.success);
        assert_eq!(handler.stored.lock().unwrap().len(), 1);

        shutdown.cancel();
        let _ = join.await;
    }
}
