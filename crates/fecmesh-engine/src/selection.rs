//! Peer selection policy (§4.2/§4.6): who gets new shards, and who
//! gets picked to receive a relocated shard.
//!
//! Grounded in `original_source/chunking/chunking_mgr.py`'s round-robin
//! peer assignment during distribution and
//! `replication_mgr.py::_select_replacement_peer`'s reliability-sorted
//! choice during relocation. A richer failure-domain-aware CRUSH
//! placement problem over disks and racks (as `objectio-placement`
//! solves) doesn't apply here: fecmesh's peer pool has no such
//! topology, so the policy below is the flat reliability-ranked list
//! CRUSH degrades to without a failure-domain tree.

use fecmesh_common::{PeerId, PeerRecord};

/// Candidate peers ranked for shard placement: highest reliability
/// first, ties broken toward the peer already holding fewer shards (to
/// spread load), per §4.6. `exclude` is typically the peer that just
/// dropped out.
#[must_use]
pub fn rank_candidates(mut peers: Vec<PeerRecord>, exclude: &[PeerId]) -> Vec<PeerRecord> {
    peers.retain(|p| !exclude.contains(&p.peer_id));
    peers.sort_by(|a, b| {
        b.reliability
            .partial_cmp(&a.reliability)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.shards_stored.cmp(&b.shards_stored))
    });
    peers
}

/// Round-robin assignment of `shard_count` shards across `peers`, per
/// `chunking_mgr.py::distribute_chunks`'s peer cycling. Returns one
/// peer id per shard, in shard order; empty if there is no peer to
/// assign to.
#[must_use]
pub fn round_robin_assignment(peers: &[PeerRecord], shard_count: usize) -> Vec<PeerId> {
    if peers.is_empty() {
        return Vec::new();
    }
    (0..shard_count)
        .map(|i| peers[i % peers.len()].peer_id.clone())
        .collect()
}

/// Pick the highest-ranked candidate not already holding another shard
/// of the same file, for relocation (§4.6).
#[must_use]
pub fn select_replacement<'a>(
    candidates: &'a [PeerRecord],
    already_holding: &[PeerId],
) -> Option<&'a PeerRecord> {
    candidates
        .iter()
        .find(|p| !already_holding.contains(&p.peer_id))
}
