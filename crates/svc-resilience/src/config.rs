//! Retry and circuit-breaker configuration (spec.md §4.1).

use std::time::Duration;

/// Backoff and attempt-count policy for a single outbound call.
///
/// `backoff = min(initial * multiplier^(attempt-1), max_backoff) * (1 ± jitter)`,
/// total attempts = `max_retries + 1`.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    pub jitter: f64,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
            jitter: 0.1,
            max_retries: 3,
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Un-jittered backoff for a given attempt (1-indexed).
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = scaled.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Worst-case total wall time across every retry wait, per spec.md §8
    /// property 4: `initial * (multiplier^(max_retries+1) - 1) / (multiplier - 1) * (1+jitter)`.
    pub fn max_total_wait(&self) -> Duration {
        let n = self.max_retries + 1;
        let geometric = if (self.multiplier - 1.0).abs() < f64::EPSILON {
            n as f64
        } else {
            (self.multiplier.powi(n as i32) - 1.0) / (self.multiplier - 1.0)
        };
        let secs = self.initial.as_secs_f64() * geometric * (1.0 + self.jitter);
        Duration::from_secs_f64(secs.min(self.max_retries as f64 * self.max_backoff.as_secs_f64() * (1.0 + self.jitter) + self.max_backoff.as_secs_f64()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryConfigBuilder {
    cfg: Opt,
}

#[derive(Debug, Clone, Copy)]
struct Opt {
    initial: Duration,
    multiplier: f64,
    max_backoff: Duration,
    jitter: f64,
    max_retries: u32,
}

impl Default for Opt {
    fn default() -> Self {
        let d = RetryConfig::default();
        Opt {
            initial: d.initial,
            multiplier: d.multiplier,
            max_backoff: d.max_backoff,
            jitter: d.jitter,
            max_retries: d.max_retries,
        }
    }
}

impl RetryConfigBuilder {
    pub fn initial(mut self, d: Duration) -> Self {
        self.cfg.initial = d;
        self
    }

    pub fn multiplier(mut self, m: f64) -> Self {
        self.cfg.multiplier = m;
        self
    }

    pub fn max_backoff(mut self, d: Duration) -> Self {
        self.cfg.max_backoff = d;
        self
    }

    pub fn jitter(mut self, j: f64) -> Self {
        self.cfg.jitter = j;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.cfg.max_retries = n;
        self
    }

    pub fn build(self) -> RetryConfig {
        RetryConfig {
            initial: self.cfg.initial,
            multiplier: self.cfg.multiplier,
            max_backoff: self.cfg.max_backoff,
            jitter: self.cfg.jitter,
            max_retries: self.cfg.max_retries,
        }
    }
}

/// Circuit-breaker thresholds (spec.md §4.1).
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
        }
    }
}
