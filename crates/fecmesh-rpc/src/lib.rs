//! fecmesh-rpc - length-prefixed JSON-RPC peer transport (C4)
//!
//! Every message is a 4-byte big-endian length prefix followed by a
//! JSON-RPC 2.0 object (§4.4/§6). One TCP connection per logical call:
//! no multiplexing, no connection reuse across concurrent calls. The
//! connection cache (`oracle::AddressCache`) only ever caches resolved
//! addresses, never live sockets.

pub mod client;
pub mod error;
pub mod methods;
pub mod oracle;
pub mod server;
pub mod timing;
pub mod wire;

pub use client::RpcClient;
pub use error::{RpcError, RpcErrorCode, TransportError};
pub use oracle::{AddressCache, NullOracle, PeerAddressOracle, StaticOracle};
pub use server::{RpcHandler, RpcServer};
