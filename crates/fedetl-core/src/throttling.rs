//! Per-client request throttling.
//!
//! Two policies are supported:
//!
//! - [`RatePolicy::MinuteWindow`]: counter over a 60 second window plus a
//!   0.5 second minimum spacing between consecutive requests. When the counter
//!   is exhausted the limiter either fails with a rate-limit error or sleeps
//!   until the window rolls over.
//! - [`RatePolicy::FixedInterval`]: at most one request every `1/rate`
//!   seconds, enforced by a governor GCRA limiter with a burst of one.
//!
//! Limiter state is owned by one client instance and never shared.

use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::clock::{Clock as GovernorClock, DefaultClock, Reference};
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use serde::Serialize;
use tracing::debug;

use crate::clock::Clock;
use crate::error::EtlError;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type GovernorInstant = <DefaultClock as GovernorClock>::Instant;

pub const WINDOW: Duration = Duration::from_secs(60);
pub const MIN_SPACING: Duration = Duration::from_millis(500);
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// What a minute-window limiter does once the window budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnLimit {
    Fail,
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePolicy {
    MinuteWindow { limit: u32, on_limit: OnLimit },
    FixedInterval { per_second: u32 },
}

impl RatePolicy {
    /// Generic fallback: 60 requests per minute, blocking when exhausted.
    pub const fn generic() -> Self {
        Self::MinuteWindow {
            limit: DEFAULT_REQUESTS_PER_MINUTE,
            on_limit: OnLimit::Wait,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::MinuteWindow { .. } => "minute_window",
            Self::FixedInterval { .. } => "fixed_interval",
        }
    }

    pub const fn limit(self) -> u32 {
        match self {
            Self::MinuteWindow { limit, .. } => limit,
            Self::FixedInterval { per_second } => per_second,
        }
    }

    pub fn min_interval(self) -> Duration {
        match self {
            Self::MinuteWindow { .. } => MIN_SPACING,
            Self::FixedInterval { per_second } => {
                Duration::from_secs_f64(1.0 / f64::from(per_second.max(1)))
            }
        }
    }
}

/// Snapshot reported by `rate_limit_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub policy: &'static str,
    pub limit: u32,
    pub period: &'static str,
    pub used: u32,
    pub remaining: u32,
    pub resets_in_secs: f64,
}

pub struct RateLimiter {
    label: String,
    policy: RatePolicy,
    clock: Arc<dyn Clock>,
    window_start: Option<Instant>,
    requests_in_window: u32,
    last_request: Option<Instant>,
    interval: Option<DirectRateLimiter>,
    interval_clock: DefaultClock,
    // Last admission on the governor's own clock.
    interval_admitted: Option<GovernorInstant>,
}

impl RateLimiter {
    /// `label` names the upstream in rate-limit messages, e.g. `"FRED"`.
    pub fn new(label: impl Into<String>, policy: RatePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            label: label.into(),
            policy,
            clock,
            window_start: None,
            requests_in_window: 0,
            last_request: None,
            interval: interval_limiter(policy),
            interval_clock: DefaultClock::default(),
            interval_admitted: None,
        }
    }

    pub const fn policy(&self) -> RatePolicy {
        self.policy
    }

    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
        self.reset();
    }

    /// Blocks or fails until one more request is allowed, then counts it.
    pub fn acquire(&mut self) -> Result<(), EtlError> {
        match self.policy {
            RatePolicy::MinuteWindow { limit, on_limit } => self.acquire_window(limit, on_limit),
            RatePolicy::FixedInterval { .. } => {
                self.acquire_interval();
                Ok(())
            }
        }
    }

    fn acquire_window(&mut self, limit: u32, on_limit: OnLimit) -> Result<(), EtlError> {
        let now = self.clock.now();
        let start = match self.window_start {
            Some(start) if now.saturating_duration_since(start) < WINDOW => start,
            _ => {
                self.window_start = Some(now);
                self.requests_in_window = 0;
                now
            }
        };

        if self.requests_in_window >= limit {
            let wait = WINDOW.saturating_sub(now.saturating_duration_since(start));
            match on_limit {
                OnLimit::Fail => {
                    return Err(EtlError::rate_limit(
                        format!(
                            "{} API rate limit exceeded. Wait {:.1} seconds",
                            self.label,
                            wait.as_secs_f64()
                        ),
                        limit,
                        Duration::from_secs(wait.as_secs() + 1),
                    ));
                }
                OnLimit::Wait => {
                    debug!(
                        source = %self.label,
                        wait_secs = wait.as_secs_f64(),
                        "rate limit reached, waiting for next window"
                    );
                    self.clock.sleep(wait);
                    self.window_start = Some(self.clock.now());
                    self.requests_in_window = 0;
                }
            }
        }

        if let Some(last) = self.last_request {
            let since_last = self.clock.now().saturating_duration_since(last);
            if since_last < MIN_SPACING {
                self.clock.sleep(MIN_SPACING - since_last);
            }
        }

        self.requests_in_window += 1;
        self.last_request = Some(self.clock.now());
        Ok(())
    }

    fn acquire_interval(&mut self) {
        if let Some(limiter) = &self.interval {
            while let Err(not_until) = limiter.check() {
                let wait = not_until.wait_time_from(self.interval_clock.now());
                // Governor tracks real time, so wait on the real clock.
                std::thread::sleep(wait);
            }
            self.interval_admitted = Some(self.interval_clock.now());
        }
        self.last_request = Some(self.clock.now());
    }

    /// Records a request that bypassed `acquire`, e.g. a connection probe.
    pub fn mark_request(&mut self) {
        let now = self.clock.now();
        match self.policy {
            RatePolicy::MinuteWindow { .. } => {
                self.window_start = Some(now);
                self.requests_in_window = 1;
            }
            RatePolicy::FixedInterval { .. } => {
                if let Some(limiter) = &self.interval {
                    let _ = limiter.check();
                    self.interval_admitted = Some(self.interval_clock.now());
                }
            }
        }
        self.last_request = Some(now);
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.requests_in_window = 0;
        self.last_request = None;
        self.interval = interval_limiter(self.policy);
        self.interval_admitted = None;
    }

    /// Minute-window usage is read from the injected clock. Fixed-interval
    /// usage is read from the governor clock that enforces it: `used` is 1
    /// until the spacing interval since the last admitted request elapses.
    pub fn status(&self) -> RateLimitStatus {
        match self.policy {
            RatePolicy::MinuteWindow { limit, .. } => {
                let now = self.clock.now();
                let elapsed = self
                    .window_start
                    .map(|start| now.saturating_duration_since(start));
                let (used, resets_in) = match elapsed {
                    Some(elapsed) if elapsed < WINDOW => {
                        (self.requests_in_window, WINDOW - elapsed)
                    }
                    _ => (0, Duration::ZERO),
                };
                RateLimitStatus {
                    policy: self.policy.name(),
                    limit,
                    period: "minute",
                    used,
                    remaining: limit.saturating_sub(used),
                    resets_in_secs: resets_in.as_secs_f64(),
                }
            }
            RatePolicy::FixedInterval { per_second } => {
                let interval = self.policy.min_interval();
                let now = self.interval_clock.now();
                let resets_in = self
                    .interval_admitted
                    .map(|admitted| interval.saturating_sub(now.duration_since(admitted).into()))
                    .unwrap_or(Duration::ZERO);
                let used = u32::from(!resets_in.is_zero());
                RateLimitStatus {
                    policy: self.policy.name(),
                    limit: per_second,
                    period: "second",
                    used,
                    remaining: per_second.saturating_sub(used),
                    resets_in_secs: resets_in.as_secs_f64(),
                }
            }
        }
    }
}

impl Debug for RateLimiter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("label", &self.label)
            .field("policy", &self.policy)
            .field("requests_in_window", &self.requests_in_window)
            .finish_non_exhaustive()
    }
}

fn interval_limiter(policy: RatePolicy) -> Option<DirectRateLimiter> {
    let RatePolicy::FixedInterval { .. } = policy else {
        return None;
    };
    let quota = Quota::with_period(policy.min_interval())
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::MIN);
    Some(governor::RateLimiter::direct(quota))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;

    fn window_limiter(limit: u32, on_limit: OnLimit) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(
            "FRED",
            RatePolicy::MinuteWindow { limit, on_limit },
            clock.clone(),
        );
        (clock, limiter)
    }

    #[test]
    fn request_past_the_window_budget_fails_then_recovers() {
        let (clock, mut limiter) = window_limiter(3, OnLimit::Fail);

        for _ in 0..3 {
            limiter.acquire().expect("within budget");
        }

        let error = limiter.acquire().expect_err("fourth request is over budget");
        assert_eq!(error.kind(), ErrorKind::RateLimit);
        assert!(error.message().starts_with("FRED API rate limit exceeded. Wait"));
        assert_eq!(
            error.context_value("limit").and_then(|v| v.as_u64()),
            Some(3)
        );
        let hint = error.retry_after().expect("retry hint");
        assert!(hint > Duration::from_secs(58) && hint <= Duration::from_secs(60));

        clock.advance(WINDOW);
        limiter.acquire().expect("window rolled over");
        assert_eq!(limiter.status().used, 1);
    }

    #[test]
    fn consecutive_requests_are_spaced() {
        let (clock, mut limiter) = window_limiter(10, OnLimit::Fail);

        limiter.acquire().expect("first");
        limiter.acquire().expect("second");
        clock.advance(Duration::from_millis(200));
        limiter.acquire().expect("third");

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_millis(300)]
        );
    }

    #[test]
    fn wait_policy_sleeps_until_the_window_rolls() {
        let (clock, mut limiter) = window_limiter(2, OnLimit::Wait);

        limiter.acquire().expect("first");
        limiter.acquire().expect("second");
        limiter.acquire().expect("third waits instead of failing");

        assert!(clock.total_slept() >= WINDOW);
        assert_eq!(limiter.status().used, 1);
    }

    #[test]
    fn mark_request_counts_the_probe() {
        let (_clock, mut limiter) = window_limiter(120, OnLimit::Fail);
        limiter.mark_request();

        let status = limiter.status();
        assert_eq!(status.policy, "minute_window");
        assert_eq!(status.used, 1);
        assert_eq!(status.remaining, 119);
        assert_eq!(status.resets_in_secs, 60.0);

        limiter.reset();
        assert_eq!(limiter.status().used, 0);
    }

    #[test]
    fn fixed_interval_spaces_requests_in_real_time() {
        let clock = Arc::new(crate::clock::SystemClock);
        let mut limiter = RateLimiter::new(
            "Haver",
            RatePolicy::FixedInterval { per_second: 50 },
            clock,
        );

        let started = Instant::now();
        limiter.acquire().expect("first");
        limiter.acquire().expect("second");
        limiter.acquire().expect("third");

        assert!(started.elapsed() >= Duration::from_millis(35));
        assert_eq!(limiter.status().policy, "fixed_interval");
        assert_eq!(limiter.status().limit, 50);
    }

    #[test]
    fn fixed_interval_status_follows_the_enforcing_clock() {
        let clock = Arc::new(ManualClock::new());
        let mut limiter = RateLimiter::new(
            "Haver",
            RatePolicy::FixedInterval { per_second: 1 },
            clock.clone(),
        );
        assert_eq!(limiter.status().used, 0);

        limiter.mark_request();
        // Injected time has no bearing on the governor-enforced spacing.
        clock.advance(Duration::from_secs(3600));

        let status = limiter.status();
        assert_eq!(status.period, "second");
        assert_eq!(status.used, 1);
        assert_eq!(status.remaining, 0);
        assert!(status.resets_in_secs > 0.0 && status.resets_in_secs <= 1.0);

        limiter.reset();
        let status = limiter.status();
        assert_eq!(status.used, 0);
        assert_eq!(status.resets_in_secs, 0.0);
    }
}
