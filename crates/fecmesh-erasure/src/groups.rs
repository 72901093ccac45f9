//! LRC local-group partitioning.
//!
//! Partitions `[0, k)` into contiguous groups of at most `group_size`
//! data-shard indices, per §4.1: "given a target LRC local-group size
//! `g`, partition `[0,k)` into `⌈k/g⌉` contiguous groups". Each group's
//! `local_recovery_index` lands in `[k+m, k+m+G)`, satisfying the
//! invariant in §3 (Local group).

use fecmesh_common::LocalGroup;

/// Build the local groups for `k` data shards with `m` parity shards,
/// grouped in runs of `group_size`. Returns one `LocalGroup` per run,
/// in ascending `group_id` order.
#[must_use]
pub fn build_local_groups(k: u16, m: u16, group_size: u16) -> Vec<LocalGroup> {
    if group_size == 0 {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut group_id = 0u16;
    let mut start = 0u16;
    while start < k {
        let end = (start + group_size).min(k);
        let shard_indices: Vec<u16> = (start..end).collect();
        groups.push(LocalGroup {
            group_id,
            shard_indices,
            local_recovery_index: k + m + group_id,
        });
        start = end;
        group_id += 1;
    }
    groups
}
