//! Throttle detection and wait-time computation.
//!
//! A throttled response (429 or 503) waits for the server's `Retry-After`
//! hint when it parses, otherwise for an exponential backoff with jitter.
//! Every computed wait is bounded above by [`MAX_WAIT`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Lower bound applied to server-provided hints.
pub const MIN_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Upper bound for any wait.
pub const MAX_WAIT: Duration = Duration::from_secs(60);

/// First computed backoff step.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Jitter added to computed backoff is drawn from `[0, MAX_JITTER_MS]`.
pub const MAX_JITTER_MS: u64 = 250;

/// Statuses the service uses to ask callers to slow down.
pub fn is_throttled(status: u16) -> bool {
    status == 429 || status == 503
}

/// Parse a `Retry-After` value: either delta-seconds or an HTTP-date.
///
/// Returns `None` when the value is neither. A date in the past yields a
/// zero duration (the caller's clamp raises it).
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds.min(MAX_WAIT.as_secs_f64())));
        }
        return None;
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        at.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

/// Clamp a server hint into `[MIN_RETRY_AFTER, MAX_WAIT]`.
pub fn clamp_retry_after(hint: Duration) -> Duration {
    hint.clamp(MIN_RETRY_AFTER, MAX_WAIT)
}

/// Backoff for the given zero-based retry before jitter: `BASE_DELAY · 2^retry`,
/// capped at [`MAX_WAIT`].
pub fn base_backoff(retry: u32) -> Duration {
    let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
    BASE_DELAY.saturating_mul(factor).min(MAX_WAIT)
}

/// Backoff with an explicit jitter, capped at [`MAX_WAIT`].
pub fn backoff_with_jitter(retry: u32, jitter: Duration) -> Duration {
    base_backoff(retry).saturating_add(jitter).min(MAX_WAIT)
}

/// Wait before the next attempt after a throttled response.
pub fn throttle_delay(retry_after: Option<&str>, retry: u32, now: DateTime<Utc>) -> Duration {
    match retry_after.and_then(|value| parse_retry_after(value, now)) {
        Some(hint) => clamp_retry_after(hint),
        None => backoff_with_jitter(retry, random_jitter()),
    }
}

fn random_jitter() -> Duration {
    Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS))
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
