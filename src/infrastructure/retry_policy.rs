//! Retry/backoff strategy shared by every fetch
//!
//! One policy object replaces per-call retry loops: it decides which
//! statuses are retriable and how long to back off before the next attempt.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total HTTP attempts per fetch (first try included)
    pub max_attempts: u32,
    /// Unit for linear (transient) and exponential (429) backoff
    pub base_delay: Duration,
    /// Cap for computed backoff without a server hint
    pub max_delay: Duration,
    /// Cap for any backoff, server hints included
    pub absolute_max_delay: Duration,
    /// HTTP statuses worth another attempt
    pub retriable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            absolute_max_delay: Duration::from_secs(300),
            retriable_statuses: [429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retriable_status(&self, status: u16) -> bool {
        self.retriable_statuses.contains(&status)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Linear backoff for connection failures and 5xx: `base × attempt`
    pub fn transient_backoff(&self, base_delay: Duration, attempt: u32) -> Duration {
        (base_delay * attempt.max(1)).min(self.absolute_max_delay)
    }

    /// Backoff for HTTP 429.
    ///
    /// Uses the server hint when present, otherwise `base × 2^(attempt-1)`
    /// bounded by `max_delay`. Up to one second of jitter is added and the
    /// result never exceeds `absolute_max_delay`.
    pub fn throttle_backoff(
        &self,
        base_delay: Duration,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> Duration {
        let jitter = Duration::from_secs_f64(fastrand::f64());
        let delay = match retry_after {
            Some(hint) => hint + jitter,
            None => {
                let exponent = attempt.saturating_sub(1).min(16);
                (base_delay * 2u32.pow(exponent)).min(self.max_delay) + jitter
            }
        };
        delay.min(self.absolute_max_delay)
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP-date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    parse_retry_after_value(raw, Utc::now())
}

fn parse_retry_after_value(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = raw.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use rstest::rstest;

    #[rstest]
    #[case(1, 5)]
    #[case(2, 10)]
    #[case(3, 15)]
    fn transient_backoff_is_linear(#[case] attempt: u32, #[case] expected_secs: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.transient_backoff(Duration::from_secs(5), attempt),
            Duration::from_secs(expected_secs)
        );
    }

    #[test]
    fn throttle_backoff_prefers_server_hint() {
        let policy = RetryPolicy::default();
        let delay = policy.throttle_backoff(Duration::from_secs(5), 1, Some(Duration::from_secs(7)));
        assert!(delay >= Duration::from_secs(7) && delay < Duration::from_secs(8));
    }

    #[test]
    fn throttle_backoff_is_exponential_without_hint() {
        let policy = RetryPolicy::default();
        let third = policy.throttle_backoff(Duration::from_secs(1), 3, None);
        assert!(third >= Duration::from_secs(4) && third < Duration::from_secs(5));
    }

    #[test]
    fn throttle_backoff_is_capped() {
        let policy = RetryPolicy::default();
        let huge = policy.throttle_backoff(Duration::from_secs(1), 1, Some(Duration::from_secs(10_000)));
        assert_eq!(huge, Duration::from_secs(300));
    }

    #[test]
    fn attempts_budget() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(policy.has_attempts_left(1));
        assert!(policy.has_attempts_left(2));
        assert!(!policy.has_attempts_left(3));
        assert!(policy.is_retriable_status(503));
        assert!(!policy.is_retriable_status(404));
    }

    #[test]
    fn retry_after_header_forms() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_retry_after_value("120", now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after_value("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after_value("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after_value("soon", now), None);

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(5)));
    }
}
