//! Unified error taxonomy (spec.md §7).
//!
//! Every error in the core carries a [`ErrorKind`] tag so that HTTP and
//! gateway-callback surfaces can map it to the right status code / `Fail`
//! reason without re-deriving the classification at each call site. This
//! plays the role a generic `ResilienceError<E>` plays for composed Tower
//! layers, collapsed to a concrete (non-generic) type since the core has
//! exactly one application error domain rather than an arbitrary wrapped
//! service error.

use std::time::Duration;
use thiserror::Error;

/// Discriminant used to classify a [`ServiceError`] for retry/HTTP-status
/// mapping purposes, independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    CapabilityDenied,
    Transient,
    CircuitOpen,
    ServiceUnavailable,
    DuplicateNonce,
    AlreadyClaimed,
    InvalidTransition,
    DeadlineExceeded,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether the dispatcher may re-enqueue an error of this kind
    /// (spec.md §4.8 steps 5/6, §7 propagation policy).
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::CircuitOpen)
    }

    /// The on-chain `Fail` reason string / reconciliation terminal reason
    /// associated with this kind, where one is specified.
    pub fn gateway_reason(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "service-not-registered",
            ErrorKind::CapabilityDenied => "capability-denied",
            ErrorKind::Transient => "gateway-unreachable",
            ErrorKind::CircuitOpen => "gateway-unreachable",
            ErrorKind::ServiceUnavailable => "service-unavailable",
            ErrorKind::DuplicateNonce => "replay",
            ErrorKind::AlreadyClaimed => "internal",
            ErrorKind::InvalidTransition => "internal",
            ErrorKind::DeadlineExceeded => "deadline-exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// The HTTP status this kind maps to on the `GET`/`POST` ingress.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::CapabilityDenied => 500,
            ErrorKind::Transient | ErrorKind::CircuitOpen | ErrorKind::ServiceUnavailable => 503,
            ErrorKind::DuplicateNonce => 409,
            ErrorKind::AlreadyClaimed => 409,
            ErrorKind::InvalidTransition => 500,
            ErrorKind::DeadlineExceeded | ErrorKind::Cancelled => 504,
            ErrorKind::Internal => 500,
        }
    }
}

/// The core's single application error type.
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capability denied: {capability}")]
    CapabilityDenied { capability: &'static str },

    #[error("transient error: {0}")]
    Transient(String),

    #[error("circuit open: retry after {retry_after:?}")]
    CircuitOpen { retry_after: Option<Duration> },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("duplicate nonce: {0}")]
    DuplicateNonce(u64),

    #[error("request already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::BadRequest(_) => ErrorKind::BadRequest,
            ServiceError::Unauthorized(_) => ErrorKind::Unauthorized,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::CapabilityDenied { .. } => ErrorKind::CapabilityDenied,
            ServiceError::Transient(_) => ErrorKind::Transient,
            ServiceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ServiceError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            ServiceError::DuplicateNonce(_) => ErrorKind::DuplicateNonce,
            ServiceError::AlreadyClaimed(_) => ErrorKind::AlreadyClaimed,
            ServiceError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            ServiceError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            ServiceError::Cancelled => ErrorKind::Cancelled,
            ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn capability_denied(capability: &'static str) -> Self {
        ServiceError::CapabilityDenied { capability }
    }

    /// Converts a caught panic payload into an `Internal` error, per the
    /// dispatcher's panic-recovery policy (spec.md §7).
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        ServiceError::Internal(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_circuit_open_are_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::CircuitOpen.is_retryable());
        assert!(!ErrorKind::BadRequest.is_retryable());
        assert!(!ErrorKind::CapabilityDenied.is_retryable());
    }

    #[test]
    fn capability_denied_maps_to_capability_denied_kind() {
        let err = ServiceError::capability_denied("Network");
        assert_eq!(err.kind(), ErrorKind::CapabilityDenied);
        assert_eq!(err.kind().gateway_reason(), "capability-denied");
    }
}
