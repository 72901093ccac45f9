//! Peer-address resolution, per §4.4/§9.
//!
//! The orchestrator↔transport cyclic dependency (the orchestrator
//! needs the transport to send, the transport needs the orchestrator's
//! peer directory to resolve addresses) is broken by injecting a
//! closure-like oracle at client construction instead of giving the
//! transport a handle back into the engine.
//!
//! Resolution order, per §4.4: the oracle first, then an in-memory
//! address cache (a cache of *resolutions*, not of live sockets — see
//! the design note in `SPEC_FULL.md` §9), then a last-resort parse of
//! a `host:port`-shaped peer identifier.

use std::collections::HashMap;

use async_trait::async_trait;
use fecmesh_common::PeerId;
use parking_lot::Mutex;

/// Maps peer identifiers to `(host, port)`. Implemented by an external
/// collaborator (the tracker/gossip layer); fecmesh only consumes it.
#[async_trait]
pub trait PeerAddressOracle: Send + Sync {
    async fn resolve(&self, peer: &PeerId) -> Option<(String, u16)>;
}

/// An oracle that never resolves anything, for tests and standalone
/// nodes that only take `host:port` peer identifiers literally.
#[derive(Debug, Default)]
pub struct NullOracle;

#[async_trait]
impl PeerAddressOracle for NullOracle {
    async fn resolve(&self, _peer: &PeerId) -> Option<(String, u16)> {
        None
    }
}

/// A static oracle backed by an in-memory map, useful for tests and
/// for nodes whose peer directory is supplied wholesale at startup.
#[derive(Debug, Default)]
pub struct StaticOracle {
    addresses: Mutex<HashMap<PeerId, (String, u16)>>,
}

impl StaticOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: PeerId, host: impl Into<String>, port: u16) {
        self.addresses.lock().insert(peer, (host.into(), port));
    }
}

#[async_trait]
impl PeerAddressOracle for StaticOracle {
    async fn resolve(&self, peer: &PeerId) -> Option<(String, u16)> {
        self.addresses.lock().get(peer).cloned()
    }
}

/// An address-resolution cache: an in-memory map from peer identifier
/// to its last-known `(host, port)`. Populated from oracle hits so a
/// subsequent call for the same peer within the oracle's TTL does not
/// need to ask again. This is *not* a socket pool (§9): each call still
/// opens a fresh `TcpStream`.
#[derive(Debug, Default)]
pub struct AddressCache {
    entries: Mutex<HashMap<PeerId, (String, u16)>>,
}

impl AddressCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, peer: PeerId, addr: (String, u16)) {
        self.entries.lock().insert(peer, addr);
    }

    #[must_use]
    pub fn get(&self, peer: &PeerId) -> Option<(String, u16)> {
        self.entries.lock().get(peer).cloned()
    }

    pub fn evict(&self, peer: &PeerId) {
        self.entries.lock().remove(peer);
    }
}

/// Parse a `PeerId` that is itself a literal `host:port` pair. The
/// normalization point the design note in §9 calls for: callers may
/// supply either a peer UUID (resolved via the oracle/cache) or a bare
/// `host:port` string, and both are accepted here.
#[must_use]
pub fn parse_literal_host_port(peer: &PeerId) -> Option<(String, u16)> {
    let (host, port) = peer.as_str().rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_oracle_resolves_inserted_peers() {
        let oracle = StaticOracle::new();
        let peer = PeerId::new("peer-a");
        oracle.insert(peer.clone(), "10.0.0.1", 9101);
        assert_eq!(oracle.resolve(&peer).await, Some(("10.0.0.1".to_string(), 9101)));
    }

    #[test]
    fn literal_host_port_parses() {
        let peer = PeerId::new("10.0.0.5:9101");
        assert_eq!(
            parse_literal_host_port(&peer),
            Some(("10.0.0.5".to_string(), 9101))
        );
    }

    #[test]
    fn literal_host_port_rejects_bare_uuid() {
        let peer = PeerId::new("3f9c2b10-uuid-peer");
        assert_eq!(parse_literal_host_port(&peer), None);
    }

    #[test]
    fn cache_remembers_and_evicts() {
        let cache = AddressCache::new();
        let peer = PeerId::new("peer-b");
        cache.remember(peer.clone(), ("10.0.0.2".to_string(), 9102));
        assert_eq!(cache.get(&peer), Some(("10.0.0.2".to_string(), 9102)));
        cache.evict(&peer);
        assert_eq!(cache.get(&peer), None);
    }
}
