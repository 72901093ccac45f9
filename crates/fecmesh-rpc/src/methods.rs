//! Request/response bodies for every method in §4.4, serialized as the
//! JSON-RPC `params`/`result` payload.
//!
//! Field names match the wire protocol verbatim (`chunk_b64`,
//! `content_hash`, ...) rather than being renamed to Rust convention,
//! since these structs *are* the wire shape.

use serde::{Deserialize, Serialize};

pub const METHOD_PING: &str = "ping";
pub const METHOD_STORE_CHUNK: &str = "store_chunk";
pub const METHOD_GET_CHUNK: &str = "get_chunk";
pub const METHOD_DELETE_CHUNK: &str = "delete_chunk";
pub const METHOD_GET_CHUNK_INFO: &str = "get_chunk_info";
pub const METHOD_LIST_CHUNKS: &str = "list_chunks";
pub const METHOD_GET_STATS: &str = "get_stats";
pub const METHOD_ANNOUNCE_FILE: &str = "announce_file";
pub const METHOD_SEARCH_FILE: &str = "search_file";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub pong: bool,
    pub peer_uuid: String,
    pub timestamp: String,
    pub received_timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreChunkRequest {
    pub file: String,
    pub index: u16,
    pub owner: String,
    pub chunk_b64: String,
    pub content_hash: String,
    pub chunk_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreChunkResponse {
    pub success: bool,
    pub stored_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChunkRequest {
    pub file: String,
    pub index: u16,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChunkResponse {
    pub success: bool,
    pub chunk_b64: String,
    pub content_hash: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteChunkRequest {
    pub file: String,
    pub index: u16,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteChunkResponse {
    pub success: bool,
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChunkInfoRequest {
    pub file: String,
    pub index: u16,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChunkInfoResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListChunksRequest {
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub file: String,
    pub index: u16,
    pub size_bytes: u64,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListChunksResponse {
    pub chunks: Vec<ChunkSummary>,
    pub total_size: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStatsRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStatsResponse {
    pub peer_uuid: String,
    pub chunks_stored: u64,
    pub total_size_bytes: u64,
    pub uptime_seconds: u64,
    pub active_connections: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceFileRequest {
    pub file: String,
    pub owner: String,
    pub manifest_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceFileResponse {
    pub success: bool,
    pub indexed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFileRequest {
    pub file: String,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub index: u16,
    pub peer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFileResponse {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_locations: Option<Vec<ChunkLocation>>,
}
