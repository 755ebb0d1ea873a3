//! `ResilientOutboundClient` — every outbound call that may fail
//! transiently passes through this component (spec.md §4.1).

use crate::circuit::CircuitBreaker;
use crate::config::{CircuitBreakerConfig, RetryConfig};
use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use svc_core::ServiceError;
use tokio::time::Instant;

/// An outbound HTTP call, including the deadline the caller's cancellation
/// propagates through (spec.md §4.1, §5).
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub deadline: Instant,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>, deadline: Instant) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HashMap::new(),
            body: Vec::new(),
            deadline,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// HTTP transport with a per-host connection pool (reqwest's own keep-alive
/// pool), exponential-backoff retry, and a three-state circuit breaker
/// (spec.md §4.1). One instance is a "logical client instance" — the
/// circuit breaker inside it is per-instance, not per-target.
pub struct ResilientOutboundClient {
    http: Client,
    retry: RetryConfig,
    breaker: CircuitBreaker,
}

impl ResilientOutboundClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, RetryConfig::default(), CircuitBreakerConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        retry: RetryConfig,
        circuit: CircuitBreakerConfig,
    ) -> Self {
        Self {
            http: Client::builder()
                .pool_max_idle_per_host(32)
                .build()
                .expect("reqwest client builds with default TLS backend"),
            retry,
            breaker: CircuitBreaker::new(name, circuit),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Executes `request`, retrying retryable failures with jittered
    /// exponential backoff up to `max_retries`, subject to the circuit
    /// breaker and the request's own deadline (spec.md §4.1, §5: "Retry
    /// back-offs are clamped so that total time cannot exceed the request
    /// deadline").
    pub async fn do_request(
        &self,
        request: OutboundRequest,
    ) -> Result<OutboundResponse, ServiceError> {
        let max_attempts = self.retry.max_retries + 1;
        let mut last_err: Option<ServiceError> = None;

        for attempt in 1..=max_attempts {
            self.breaker.allow()?;

            if Instant::now() >= request.deadline {
                return Err(ServiceError::DeadlineExceeded);
            }

            let outcome = tokio::time::timeout_at(request.deadline, self.send_once(&request)).await;

            match outcome {
                Err(_elapsed) => {
                    self.breaker.record_failure("deadline exceeded");
                    return Err(ServiceError::DeadlineExceeded);
                }
                Ok(Ok(response)) => {
                    if is_retryable_status(response.status) && attempt < max_attempts {
                        self.breaker.record_failure(format!("status {}", response.status));
                        last_err = Some(ServiceError::Transient(format!(
                            "upstream status {}",
                            response.status
                        )));
                        self.wait_before_retry(attempt, request.deadline).await?;
                        self.breaker.record_retry();
                        continue;
                    }
                    if is_retryable_status(response.status) {
                        self.breaker.record_failure(format!("status {}", response.status));
                        return Err(ServiceError::Transient(format!(
                            "upstream status {} (retries exhausted)",
                            response.status
                        )));
                    }
                    self.breaker.record_success();
                    return Ok(response);
                }
                Ok(Err(transport_err)) => {
                    self.breaker.record_failure(transport_err.to_string());
                    last_err = Some(ServiceError::Transient(transport_err.to_string()));
                    if attempt < max_attempts {
                        self.wait_before_retry(attempt, request.deadline).await?;
                        self.breaker.record_retry();
                        continue;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ServiceError::Transient("retries exhausted".into())))
    }

    async fn send_once(&self, request: &OutboundRequest) -> Result<OutboundResponse, reqwest::Error> {
        let mut builder = self.http.request(request.method.clone(), &request.url);
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?.to_vec();
        Ok(OutboundResponse { status, headers, body })
    }

    async fn wait_before_retry(
        &self,
        attempt: u32,
        deadline: Instant,
    ) -> Result<(), ServiceError> {
        let base = self.retry.base_backoff(attempt);
        let jittered = apply_jitter(base, self.retry.jitter);
        let remaining = deadline.saturating_duration_since(Instant::now());
        let wait = jittered.min(remaining);
        if wait.is_zero() && remaining.is_zero() {
            return Err(ServiceError::DeadlineExceeded);
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = tokio::time::sleep_until(deadline) => Err(ServiceError::DeadlineExceeded),
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(
        StatusCode::from_u16(status),
        Ok(StatusCode::TOO_MANY_REQUESTS)
            | Ok(StatusCode::INTERNAL_SERVER_ERROR)
            | Ok(StatusCode::BAD_GATEWAY)
            | Ok(StatusCode::SERVICE_UNAVAILABLE)
            | Ok(StatusCode::GATEWAY_TIMEOUT)
    )
}

/// Applies `(1 ± jitter)` using a CSPRNG, per the REDESIGN FLAG in
/// SPEC_FULL.md — `rand::rng()` is a CSPRNG-backed thread-local generator,
/// never a non-cryptographic source.
fn apply_jitter(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_match_spec() {
        for code in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(code));
        }
        for code in [200, 400, 401, 404] {
            assert!(!is_retryable_status(code));
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let d = apply_jitter(base, 0.1);
            assert!(d.as_millis() >= 89 && d.as_millis() <= 111);
        }
    }
}
