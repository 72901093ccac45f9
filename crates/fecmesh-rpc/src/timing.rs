//! Adaptive timeout and connect-backoff formulas, per §4.4.
//!
//! Constants resolved from `original_source/chunking/peer_rpc.py`
//! (the more-featureful of the two `peer_rpc.py` revisions, per the
//! design note in §9) and carried verbatim as the defaults here.

use std::time::Duration;

/// Floor under the adaptive timeout, regardless of payload size.
pub const MIN_TIMEOUT_SECONDS: u64 = 10;

/// Assumed peer throughput used to size the adaptive timeout.
pub const BYTES_PER_SECOND_ESTIMATE: u64 = 1024 * 1024;

/// Fixed overhead added on top of the size-based timeout.
pub const TIMEOUT_OVERHEAD_SECONDS: u64 = 10;

/// Ceiling on the exponential connect backoff.
pub const MAX_RETRY_DELAY_SECONDS: u64 = 60;

/// `timeout = max(base_timeout, 2*payload_bytes/1MiB*s) + 10s, floor 10s`.
/// Applied independently to the request-write phase (sized off the
/// outgoing frame) and the response-read phase (sized off the
/// declared response frame length, once known).
#[must_use]
pub fn adaptive_timeout(base_timeout_seconds: u64, payload_bytes: usize) -> Duration {
    let size_based_seconds =
        (2 * payload_bytes as u64).div_ceil(BYTES_PER_SECOND_ESTIMATE);
    let base = base_timeout_seconds.max(size_based_seconds);
    let with_overhead = base + TIMEOUT_OVERHEAD_SECONDS;
    Duration::from_secs(with_overhead.max(MIN_TIMEOUT_SECONDS))
}

/// `base * 2^(attempt-1)`, clamped at 60s. `attempt` is 1-indexed (the
/// delay waited *before* the given attempt, so `attempt=1` is the
/// delay before the first retry).
#[must_use]
pub fn backoff_delay(base_delay_seconds: u64, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    let exp = base_delay_seconds.saturating_mul(1u64 << shift);
    Duration::from_secs(exp.min(MAX_RETRY_DELAY_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_floors_at_ten_seconds_for_tiny_payloads() {
        assert_eq!(adaptive_timeout(5, 0), Duration::from_secs(15));
    }

    #[test]
    fn timeout_scales_with_payload_size() {
        // 2 * 4 MiB / 1 MiB/s = 8s, plus 10s overhead = 18s.
        let t = adaptive_timeout(5, 4 * 1024 * 1024);
        assert_eq!(t, Duration::from_secs(18));
    }

    #[test]
    fn backoff_doubles_then_clamps() {
        assert_eq!(backoff_delay(5, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(5, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(5, 3), Duration::from_secs(20));
        assert_eq!(backoff_delay(5, 10), Duration::from_secs(MAX_RETRY_DELAY_SECONDS));
    }
}
