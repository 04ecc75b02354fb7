use std::time::Duration;

use rand::Rng;

use crate::client::TransportFailure;
use crate::config::RetryPolicy;

/// Retryable upstream statuses: request timeout, rate limit, and 5xx.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

pub fn is_retryable_failure(failure: &TransportFailure) -> bool {
    match failure {
        TransportFailure::Transport { .. } => true,
        TransportFailure::Http { status, .. } => is_retryable_status(*status),
    }
}

/// Linear backoff `attempt * base_delay` plus up to 25% jitter, never above
/// the policy ceiling. A `retry-after` value (seconds) overrides the ramp.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(after) = retry_after {
        return after.min(policy.max_delay);
    }
    let base = policy.base_delay.saturating_mul(attempt.max(1));
    let jitter_ms = rand::rng().random_range(0..=base.as_millis().max(1) as u64 / 4);
    (base + Duration::from_millis(jitter_ms)).min(policy.max_delay)
}

pub fn parse_retry_after(headers: &[(String, String)]) -> Option<Duration> {
    let value = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("retry-after"))
        .map(|(_, value)| value.trim())?;
    let secs = value.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}
