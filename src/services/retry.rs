//! Backoff schedules and cancellable sleeps.
//!
//! Two independent retry envelopes exist: the per-action schedule
//! (exponential, capped) applied inside the registry's action loop, and the
//! engine-level schedule (linear in the retry count) applied to failed
//! execution tasks.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::models::RetryPolicy;

/// Delay before per-action attempt `k` (0-based):
/// `min(base_interval * backoff_factor^k, max_interval)`.
pub fn action_retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = policy.backoff_factor.max(0.0).powi(attempt as i32);
    let delay = policy.base_interval.mul_f64(factor);
    delay.min(policy.max_interval)
}

/// Engine-level delay before re-enqueueing a failed task:
/// `base * backoff_factor * (retry + 1)` — linear in the retry count.
pub fn task_retry_delay(base: Duration, backoff_factor: f64, retry: u32) -> Duration {
    base.mul_f64(backoff_factor.max(0.0) * f64::from(retry + 1))
}

/// Sleep that can be interrupted by cancellation. Returns `true` when the
/// full delay elapsed, `false` when cancelled first.
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancel.cancelled() => false,
    }
}
