//! Peer RPC client, per §4.4.
//!
//! One TCP connection per logical call (no multiplexing, no reuse of
//! a connection for a concurrent second call, per §4.4/§5): `call`
//! resolves the peer's address, connects with exponential-backoff
//! retries, writes one request frame under an adaptive write timeout,
//! reads one response frame under an adaptive read timeout recomputed
//! from the declared frame length, and then drops the connection.
//! Any I/O failure after connecting closes the connection without a
//! transport-level retry — the caller (the orchestrator or the
//! replication controller) retries at the RPC level instead.

use std::sync::Arc;
use std::time::Duration;

use fecmesh_common::config::NetworkConfig;
use fecmesh_common::PeerId;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::methods::{
    AnnounceFileRequest, AnnounceFileResponse, DeleteChunkRequest, DeleteChunkResponse,
    GetChunkInfoRequest, GetChunkInfoResponse, GetChunkRequest, GetChunkResponse, GetStatsRequest,
    GetStatsResponse, ListChunksRequest, ListChunksResponse, PingRequest, PingResponse,
    SearchFileRequest, SearchFileResponse, StoreChunkRequest, StoreChunkResponse,
    METHOD_ANNOUNCE_FILE, METHOD_DELETE_CHUNK, METHOD_GET_CHUNK, METHOD_GET_CHUNK_INFO,
    METHOD_GET_STATS, METHOD_LIST_CHUNKS, METHOD_PING, METHOD_SEARCH_FILE, METHOD_STORE_CHUNK,
};
use crate::oracle::{parse_literal_host_port, AddressCache, PeerAddressOracle};
use crate::timing::{adaptive_timeout, backoff_delay};
use crate::wire::{read_frame_body, read_frame_len, write_frame, RpcRequest, RpcResponse};
use crate::{RpcError, TransportError};

/// Client-side handle to the peer RPC transport.
pub struct RpcClient {
    oracle: Arc<dyn PeerAddressOracle>,
    cache: AddressCache,
    config: NetworkConfig,
    sender_uuid: Uuid,
}

impl RpcClient {
    #[must_use]
    pub fn new(oracle: Arc<dyn PeerAddressOracle>, config: NetworkConfig, sender_uuid: Uuid) -> Self {
        Self {
            oracle,
            cache: AddressCache::new(),
            config,
            sender_uuid,
        }
    }

    async fn resolve(&self, peer: &PeerId) -> Result<(String, u16), TransportError> {
        if let Some(addr) = self.oracle.resolve(peer).await {
            self.cache.remember(peer.clone(), addr.clone());
            return Ok(addr);
        }
        if let Some(addr) = self.cache.get(peer) {
            return Ok(addr);
        }
        if let Some(addr) = parse_literal_host_port(peer) {
            return Ok(addr);
        }
        Err(TransportError::AddressResolution(peer.as_str().to_string()))
    }

    /// Connect to `peer`, retrying up to `max_connection_retries`
    /// times with exponential backoff (§4.4). The delay is waited
    /// *before* a retry attempt, not after the final failure.
    async fn connect(&self, peer: &PeerId) -> Result<TcpStream, TransportError> {
        let (host, port) = self.resolve(peer).await?;
        let addr = format!("{host}:{port}");
        let mut last_err = None;
        for attempt in 1..=self.config.max_connection_retries.max(1) {
            match TcpStream::connect(&addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(peer = %peer, attempt, error = %e, "connect attempt failed");
                    last_err = Some(e);
                    if attempt < self.config.max_connection_retries.max(1) {
                        tokio::time::sleep(backoff_delay(
                            self.config.connection_retry_delay_seconds,
                            attempt,
                        ))
                        .await;
                    }
                }
            }
        }
        self.cache.evict(peer);
        Err(TransportError::ConnectFailed {
            attempts: self.config.max_connection_retries.max(1),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "no connection attempts made")
            }),
        })
    }

    /// Perform one JSON-RPC call: connect, write one request frame,
    /// read one response frame, disconnect. No retry at this layer.
    #[instrument(skip(self, params), fields(peer = %peer, method))]
    async fn call(&self, peer: &PeerId, method: &str, params: Value) -> Result<Value, TransportError> {
        let mut stream = self.connect(peer).await?;

        let request = RpcRequest::new(method, params, self.sender_uuid);
        let body = serde_json::to_vec(&request)
            .map_err(|e| TransportError::Malformed(format!("encoding request: {e}")))?;

        let write_timeout = adaptive_timeout(self.config.rpc_timeout_seconds, body.len());
        tokio::time::timeout(write_timeout, write_frame(&mut stream, &body))
            .await
            .map_err(|_| TransportError::Timeout)??;

        // The length prefix itself is tiny, so it's read under the base
        // timeout; the body read is then timed against an adaptive
        // budget recomputed from the declared frame length (§4.4).
        let len_timeout = adaptive_timeout(self.config.rpc_timeout_seconds, 0);
        let declared_len = tokio::time::timeout(len_timeout, read_frame_len(&mut stream))
            .await
            .map_err(|_| TransportError::Timeout)??;

        let body_timeout = adaptive_timeout(self.config.rpc_timeout_seconds, declared_len as usize);
        let response_body = tokio::time::timeout(
            body_timeout,
            read_frame_body(&mut stream, declared_len, self.config.max_message_size),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        let response: RpcResponse = serde_json::from_slice(&response_body)
            .map_err(|e| TransportError::Malformed(format!("decoding response: {e}")))?;
        debug!(id = %response.id, "rpc call completed");
        Ok(response.into_result()?)
    }

    async fn call_typed<R: DeserializeOwned>(
        &self,
        peer: &PeerId,
        method: &str,
        params: Value,
    ) -> Result<R, TransportError> {
        let value = self.call(peer, method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| TransportError::Malformed(format!("decoding {method} result: {e}")))
    }

    pub async fn ping(&self, peer: &PeerId) -> Result<PingResponse, TransportError> {
        let req = PingRequest {
            timestamp: fecmesh_common::time::now().to_iso8601(),
        };
        self.call_typed(peer, METHOD_PING, serde_json::to_value(req).unwrap())
            .await
    }

    pub async fn store_chunk(
        &self,
        peer: &PeerId,
        req: StoreChunkRequest,
    ) -> Result<StoreChunkResponse, TransportError> {
        self.call_typed(peer, METHOD_STORE_CHUNK, serde_json::to_value(req).unwrap())
            .await
    }

    pub async fn get_chunk(
        &self,
        peer: &PeerId,
        req: GetChunkRequest,
    ) -> Result<GetChunkResponse, TransportError> {
        self.call_typed(peer, METHOD_GET_CHUNK, serde_json::to_value(req).unwrap())
            .await
    }

    pub async fn delete_chunk(
        &self,
        peer: &PeerId,
        req: DeleteChunkRequest,
    ) -> Result<DeleteChunkResponse, TransportError> {
        self.call_typed(peer, METHOD_DELETE_CHUNK, serde_json::to_value(req).unwrap())
            .await
    }

    pub async fn get_chunk_info(
        &self,
        peer: &PeerId,
        req: GetChunkInfoRequest,
    ) -> Result<GetChunkInfoResponse, TransportError> {
        self.call_typed(peer, METHOD_GET_CHUNK_INFO, serde_json::to_value(req).unwrap())
            .await
    }

    pub async fn list_chunks(
        &self,
        peer: &PeerId,
        req: ListChunksRequest,
    ) -> Result<ListChunksResponse, TransportError> {
        self.call_typed(peer, METHOD_LIST_CHUNKS, serde_json::to_value(req).unwrap())
            .await
    }

    pub async fn get_stats(&self, peer: &PeerId) -> Result<GetStatsResponse, TransportError> {
        self.call_typed(peer, METHOD_GET_STATS, serde_json::to_value(GetStatsRequest {}).unwrap())
            .await
    }

    pub async fn announce_file(
        &self,
        peer: &PeerId,
        req: AnnounceFileRequest,
    ) -> Result<AnnounceFileResponse, TransportError> {
        self.call_typed(peer, METHOD_ANNOUNCE_FILE, serde_json::to_value(req).unwrap())
            .await
    }

    pub async fn search_file(
        &self,
        peer: &PeerId,
        req: SearchFileRequest,
    ) -> Result<SearchFileResponse, TransportError> {
        self.call_typed(peer, METHOD_SEARCH_FILE, serde_json::to_value(req).unwrap())
            .await
    }

    /// `store_chunk` at-least-once (§4.4/§7): retry the whole call
    /// (fresh connection each attempt) with exponential backoff up to
    /// `max_retries`. The server idempotently overwrites on replay.
    pub async fn store_chunk_at_least_once(
        &self,
        peer: &PeerId,
        req: StoreChunkRequest,
        max_retries: u32,
        base_delay: Duration,
    ) -> Result<StoreChunkResponse, TransportError> {
        let mut last_err = None;
        for attempt in 1..=max_retries.max(1) {
            match self.store_chunk(peer, req.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(peer = %peer, attempt, error = %e, "store_chunk attempt failed");
                    last_err = Some(e);
                    if attempt < max_retries.max(1) {
                        tokio::time::sleep(backoff_delay(base_delay.as_secs().max(1), attempt)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(TransportError::Timeout))
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rpc(e) => e,
            other => RpcError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::NullOracle;

    #[tokio::test]
    async fn resolve_falls_back_to_literal_host_port() {
        let client = RpcClient::new(Arc::new(NullOracle), NetworkConfig::default(), Uuid::new_v4());
        let peer = PeerId::new("127.0.0.1:9999");
        let addr = client.resolve(&peer).await.unwrap();
        assert_eq!(addr, ("127.0.0.1".to_string(), 9999));
    }

    #[tokio::test]
    async fn resolve_fails_for_opaque_uuid_with_no_oracle_hit() {
        let client = RpcClient::new(Arc::new(NullOracle), NetworkConfig::default(), Uuid::new_v4());
        let peer = PeerId::new("not-a-host-port-uuid");
        assert!(client.resolve(&peer).await.is_err());
    }
}
