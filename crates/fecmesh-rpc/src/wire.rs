//! Wire frame and JSON-RPC 2.0 envelope, per §4.4/§6.
//!
//! Every message is a 4-byte big-endian length prefix followed by
//! exactly that many UTF-8 bytes of a JSON object. The frame carries a
//! JSON-RPC 2.0 request or response, with an added `sender_uuid` and
//! `timestamp` on requests. Connections are one request, one response,
//! half-duplex: `write_frame`/`read_frame` are called exactly once per
//! direction per logical call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::RpcError;

/// Default ceiling on an accepted frame, overridable per server/client
/// via `NetworkConfig::max_message_size` (§6: `MAX_MESSAGE_SIZE`).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// A JSON-RPC 2.0 request, plus the `sender_uuid`/`timestamp` fields
/// this transport adds on top of the bare JSON-RPC 2.0 envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: String,
    pub sender_uuid: Uuid,
    pub timestamp: String,
}

impl RpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, sender_uuid: Uuid) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: Uuid::new_v4().to_string(),
            sender_uuid,
            timestamp: fecmesh_common::time::now().to_iso8601(),
        }
    }
}

/// A JSON-RPC 2.0 response. Echoes the request `id`; exactly one of
/// `result`/`error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: String,
}

impl RpcResponse {
    #[must_use]
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn err(id: impl Into<String>, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id: id.into(),
        }
    }

    /// Unwrap into the application-level result, turning a JSON-RPC
    /// error object into a Rust error.
    pub fn into_result(self) -> Result<Value, RpcError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Write one length-prefixed frame: a 4-byte big-endian length
/// followed by `body`.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(body.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame body too large for u32 length prefix")
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Read just the 4-byte length prefix of a frame, returning the
/// declared body length. Split out from `read_frame` so a caller can
/// time the prefix read and the body read separately (§4.4: the
/// read-phase timeout is recomputed once the length is known).
pub async fn read_frame_len<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<u32> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    Ok(u32::from_be_bytes(len_buf))
}

/// Read a frame body of exactly `len` bytes, rejecting declared
/// lengths above `max_frame_size`.
pub async fn read_frame_body<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: u32,
    max_frame_size: usize,
) -> std::io::Result<Vec<u8>> {
    let len = len as usize;
    if len > max_frame_size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds max_frame_size {max_frame_size}"),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Read one length-prefixed frame in a single shot: the length prefix
/// immediately followed by the body, under one caller-supplied budget.
/// Callers that need to rescale their timeout once the length is known
/// (the RPC client) should call `read_frame_len`/`read_frame_body`
/// directly instead.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> std::io::Result<Vec<u8>> {
    let len = read_frame_len(reader).await?;
    read_frame_body(reader, len, max_frame_size).await
}
