//! The runtime's own lifecycle state machine (spec.md §4.3), distinct from
//! a `Request`'s lifecycle in `svc-core::request` — this one governs the
//! service process, not an individual unit of work.

use svc_core::{ErrorKind, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl RuntimeState {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeState::Created => "created",
            RuntimeState::Starting => "starting",
            RuntimeState::Running => "running",
            RuntimeState::Stopping => "stopping",
            RuntimeState::Stopped => "stopped",
            RuntimeState::Failed => "failed",
        }
    }

    /// Any state may transition to `Failed`; otherwise the only legal
    /// moves are the two linear chains `Created -> Starting -> Running`
    /// and `Running -> Stopping -> Stopped`.
    pub fn validate_transition(self, next: RuntimeState) -> Result<(), ServiceError> {
        use RuntimeState::*;
        let ok = match (self, next) {
            (_, Failed) => true,
            (Created, Starting) => true,
            (Starting, Running) => true,
            (Running, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ServiceError::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl From<RuntimeState> for ErrorKind {
    fn from(_: RuntimeState) -> Self {
        ErrorKind::InvalidTransition
    }
}
