//! Resilient outbound HTTP client: per-host connection pooling (via
//! `reqwest`), jittered exponential-backoff retry, and a three-state
//! circuit breaker (spec.md §4.1). Retry and circuit-breaking are
//! collapsed into the single concrete client spec.md asks for rather than
//! a pair of generic `tower::Layer`s.

pub mod circuit;
pub mod client;
pub mod config;

pub use circuit::{CircuitBreaker, CircuitState, CircuitStateChanged, Metrics};
pub use client::{OutboundRequest, OutboundResponse, ResilientOutboundClient};
pub use config::{CircuitBreakerConfig, RetryConfig, RetryConfigBuilder};
