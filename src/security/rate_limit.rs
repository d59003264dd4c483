//! Per-client fixed-window rate limiting.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// Body text returned to clients that exceed their quota.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again later.";

pub const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Request count for one client within the current window.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub started_at: Instant,
    pub count: u64,
}

/// Quota state reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStatus {
    pub limit: u64,
    pub remaining: u64,
    /// Time until the current window ends.
    pub reset_after: Duration,
    pub window: Duration,
}

impl RateStatus {
    /// Write the standard `RateLimit-*` headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let policy = format!("{};w={}", self.limit, self.window.as_secs());
        if let Ok(value) = HeaderValue::from_str(&policy) {
            headers.insert(RATELIMIT_POLICY, value);
        }
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(RATELIMIT_RESET, HeaderValue::from(ceil_secs(self.reset_after)));
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed(RateStatus),
    Limited(RateStatus),
}

impl RateDecision {
    pub fn status(&self) -> &RateStatus {
        match self {
            RateDecision::Allowed(status) | RateDecision::Limited(status) => status,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed(_))
    }
}

/// Window store keyed by client identity.
///
/// Each check holds the key's map entry for the whole read-increment-compare, so
/// concurrent requests from one client never lose counts.
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    window: Duration,
    max_requests: u64,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            window: config.window(),
            max_requests: config.max_requests,
            clock,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request from `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = self.clock.now();
        let mut inserted = false;

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| {
                inserted = true;
                RateWindow {
                    started_at: now,
                    count: 0,
                }
            });

        if now.duration_since(entry.started_at) >= self.window {
            *entry = RateWindow {
                started_at: now,
                count: 0,
            };
        }
        entry.count = entry.count.saturating_add(1);

        let status = RateStatus {
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_after: self.window.saturating_sub(now.duration_since(entry.started_at)),
            window: self.window,
        };

        let limited = entry.count > self.max_requests;
        // `len` takes every shard lock; release this key's first.
        drop(entry);
        if inserted {
            metrics::record_tracked_clients(self.windows.len());
        }

        if limited {
            RateDecision::Limited(status)
        } else {
            RateDecision::Allowed(status)
        }
    }

    /// Drop windows that have elapsed. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.started_at) < self.window);
        let removed = before.saturating_sub(self.windows.len());
        metrics::record_tracked_clients(self.windows.len());
        removed
    }

    /// Number of clients with a live window.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = RateLimitConfig {
            window_minutes: 15,
            max_requests: max,
        };
        (RateLimiter::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_ceiling_enforced() {
        let (limiter, _) = limiter(100);
        for i in 1..=100 {
            let decision = limiter.check("10.0.0.1");
            assert!(decision.is_allowed(), "request {} should pass", i);
            assert_eq!(decision.status().remaining, 100 - i);
        }
        assert!(!limiter.check("10.0.0.1").is_allowed());
        assert!(!limiter.check("10.0.0.1").is_allowed());
        assert!(limiter.check("10.0.0.2").is_allowed());
    }

    #[test]
    fn test_window_resets() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.check("a").is_allowed());
        assert!(limiter.check("a").is_allowed());
        assert!(!limiter.check("a").is_allowed());

        clock.advance(Duration::from_secs(14 * 60));
        let decision = limiter.check("a");
        assert!(!decision.is_allowed());
        assert_eq!(decision.status().reset_after, Duration::from_secs(60));

        clock.advance(Duration::from_secs(60));
        let decision = limiter.check("a");
        assert!(decision.is_allowed());
        assert_eq!(decision.status().remaining, 1);
    }

    #[test]
    fn test_prune_expired() {
        let (limiter, clock) = limiter(10);
        limiter.check("old");
        clock.advance(Duration::from_secs(10 * 60));
        limiter.check("new");
        clock.advance(Duration::from_secs(5 * 60));

        assert_eq!(limiter.prune_expired(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_concurrent_counts_not_lost() {
        let (limiter, _) = limiter(1_000_000);
        let limiter = Arc::new(limiter);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        limiter.check("shared");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let decision = limiter.check("shared");
        assert_eq!(decision.status().remaining, 1_000_000 - 8001);
    }

    /// Captures the last value written to any gauge.
    #[derive(Default)]
    struct GaugeCapture(Arc<Mutex<Option<f64>>>);

    struct CapturedGauge(Arc<Mutex<Option<f64>>>);

    impl ::metrics::GaugeFn for CapturedGauge {
        fn increment(&self, _value: f64) {}
        fn decrement(&self, _value: f64) {}
        fn set(&self, value: f64) {
            *self.0.lock().unwrap() = Some(value);
        }
    }

    impl ::metrics::Recorder for GaugeCapture {
        fn describe_counter(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_gauge(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_histogram(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}

        fn register_counter(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Counter {
            ::metrics::Counter::noop()
        }

        fn register_gauge(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Gauge {
            ::metrics::Gauge::from_arc(Arc::new(CapturedGauge(self.0.clone())))
        }

        fn register_histogram(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Histogram {
            ::metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_tracked_clients_gauge_follows_new_clients() {
        let recorder = GaugeCapture::default();
        let (limiter, _) = limiter(10);

        ::metrics::with_local_recorder(&recorder, || {
            limiter.check("a");
            assert_eq!(*recorder.0.lock().unwrap(), Some(1.0));

            *recorder.0.lock().unwrap() = None;
            limiter.check("a");
            assert_eq!(*recorder.0.lock().unwrap(), None);

            limiter.check("b");
            assert_eq!(*recorder.0.lock().unwrap(), Some(2.0));
        });
    }

    #[test]
    fn test_headers() {
        let (limiter, _) = limiter(100);
        let decision = limiter.check("a");
        let mut headers = HeaderMap::new();
        decision.status().apply_headers(&mut headers);

        assert_eq!(headers[RATELIMIT_LIMIT], "100");
        assert_eq!(headers[RATELIMIT_REMAINING], "99");
        assert_eq!(headers[RATELIMIT_RESET], "900");
        assert_eq!(headers[RATELIMIT_POLICY], "100;w=900");
        assert!(headers.get("x-ratelimit-limit").is_none());
    }
}
