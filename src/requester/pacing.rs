use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Tracks the most recent server pacing signal
///
/// Every response overwrites the previous signal: a response carrying
/// `Retry-After` sets both the recommended delay and the "next allowed request"
/// watermark, and a response without it puts the recommended delay back to the
/// configured default.
#[derive(Debug, Clone)]
pub struct Pacing {
    default_delay: Duration,
    max_retry_after: Duration,
    last_retry_after: Option<Duration>,
    next_allowed_at: Option<Instant>,
}

impl Pacing {
    pub fn new(default_delay: Duration, max_retry_after: Duration) -> Self {
        Self {
            default_delay,
            max_retry_after,
            last_retry_after: None,
            next_allowed_at: None,
        }
    }

    /// Records the `Retry-After` of a response (or its absence)
    ///
    /// # Returns
    ///
    /// The capped delay that was recorded, if the response carried one
    pub fn observe(&mut self, retry_after: Option<Duration>, now: Instant) -> Option<Duration> {
        let capped = retry_after.map(|d| d.min(self.max_retry_after));
        self.last_retry_after = capped;
        if let Some(delay) = capped {
            self.next_allowed_at = Some(now + delay);
        }
        capped
    }

    /// Delay the caller should sleep before its next request
    pub fn recommended_delay(&self) -> Duration {
        self.last_retry_after.unwrap_or(self.default_delay)
    }

    pub fn next_allowed_at(&self) -> Option<Instant> {
        self.next_allowed_at
    }

    /// How much earlier than the watermark a request at `now` would be
    pub fn early_by(&self, now: Instant) -> Option<Duration> {
        self.next_allowed_at
            .and_then(|at| at.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }
}

/// Parses a `Retry-After` header value
///
/// Accepts delta-seconds (`"30"`) or an HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). A date in the past yields zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc).signed_duration_since(now);
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Exponential backoff for the n-th retry (1-based), capped at `max`
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}
