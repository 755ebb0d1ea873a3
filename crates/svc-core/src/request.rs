//! The `Request` aggregate (spec.md §3).
//!
//! Identity fields are set once at construction and never mutated; status
//! and its dependent fields move forward through [`RequestStatus`] and
//! nowhere else — [`RequestStatus::validate_transition`] is the single
//! place that enforces the partial order `Pending < Processing <
//! {Completed, Failed}` (spec.md §4.4).

use crate::error::ServiceError;
use crate::ids::{AccountId, RequestId};
use std::time::SystemTime;

/// Where a request entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    OnChain,
    Http,
}

/// Lifecycle status of a [`Request`] (spec.md §3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    fn rank(self) -> u8 {
        match self {
            RequestStatus::Pending => 0,
            RequestStatus::Processing => 1,
            RequestStatus::Completed | RequestStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    /// Enforces `Pending < Processing < {Completed, Failed}`; a regression
    /// or a same-state no-op is rejected with `ErrInvalidTransition`
    /// (spec.md §4.4).
    pub fn validate_transition(self, next: RequestStatus) -> Result<(), ServiceError> {
        if next.rank() > self.rank() {
            Ok(())
        } else {
            Err(ServiceError::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

/// An in-flight or terminal unit of work (spec.md §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub origin: Origin,
    pub service_type: String,
    pub account_id: AccountId,
    pub caller: String,
    pub user_contract: Option<String>,
    pub callback_method: Option<String>,
    pub payload: Vec<u8>,
    pub created_at: SystemTime,

    pub status: RequestStatus,
    pub result: Option<Vec<u8>>,
    pub error: Option<String>,
    pub completed_at: Option<SystemTime>,
}

impl Request {
    /// Constructs a new request in `Pending` status. Identity fields are
    /// fixed at this point and never change afterward.
    pub fn new(
        origin: Origin,
        service_type: impl Into<String>,
        account_id: AccountId,
        caller: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            origin,
            service_type: service_type.into(),
            account_id,
            caller: caller.into(),
            user_contract: None,
            callback_method: None,
            payload,
            created_at: SystemTime::now(),
            status: RequestStatus::Pending,
            result: None,
            error: None,
            completed_at: None,
        }
    }

    /// Moves the request to `Completed` with a result. Fails if the request
    /// is already terminal (spec.md §3 invariant).
    pub fn complete(&mut self, result: Vec<u8>) -> Result<(), ServiceError> {
        self.status.validate_transition(RequestStatus::Completed)?;
        self.status = RequestStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(SystemTime::now());
        Ok(())
    }

    /// Moves the request to `Failed` with an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), ServiceError> {
        self.status.validate_transition(RequestStatus::Failed)?;
        self.status = RequestStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(SystemTime::now());
        Ok(())
    }

    /// Moves the request to `Processing`, the claim operation performed
    /// atomically by the store (spec.md §4.8).
    pub fn start_processing(&mut self) -> Result<(), ServiceError> {
        self.status.validate_transition(RequestStatus::Processing)?;
        self.status = RequestStatus::Processing;
        Ok(())
    }
}
