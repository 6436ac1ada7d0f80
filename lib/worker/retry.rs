use std::time::Duration;

use chrono::{DateTime, Utc};

/// How often a failed request is re-enqueued and how long it waits before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Whether a request that has failed `retry_count + 1` times may be re-enqueued.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count.saturating_add(1) < self.max_attempts.max(1)
    }
}

pub fn compute_backoff_delay(policy: &RetryPolicy, retry_count: u32, seed: u64) -> Duration {
    if retry_count == 0 || (policy.initial_backoff.is_zero() && policy.jitter.is_zero()) {
        return Duration::ZERO;
    }

    let shift = u32::min(retry_count - 1, 20);
    let exponential_ms = policy
        .initial_backoff
        .as_millis()
        .saturating_mul(1u128 << shift);
    let capped_ms = exponential_ms.min(policy.max_backoff.as_millis());

    let jitter_ms = if policy.jitter.is_zero() {
        0
    } else {
        deterministic_jitter(seed, retry_count, policy.jitter.as_millis())
    };

    let total_ms = capped_ms.saturating_add(jitter_ms);
    Duration::from_millis(total_ms.min(u64::MAX as u128) as u64)
}

/// Time left before a retried envelope that entered the queue at `entered_at` may run again.
pub fn remaining_backoff(
    policy: &RetryPolicy,
    retry_count: u32,
    entered_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Duration {
    let seed = entered_at.timestamp_nanos_opt().unwrap_or_default() as u64;
    let delay = compute_backoff_delay(policy, retry_count, seed);
    let elapsed = (now - entered_at).to_std().unwrap_or(Duration::ZERO);
    delay.saturating_sub(elapsed)
}

fn deterministic_jitter(seed: u64, attempt: u32, jitter_cap: u128) -> u128 {
    if jitter_cap == 0 {
        return 0;
    }

    let mut x = seed ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;

    (x as u128) % (jitter_cap + 1)
}
