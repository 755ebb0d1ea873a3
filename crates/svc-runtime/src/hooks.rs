//! Lifecycle hooks (spec.md §4.3: `on_before_start`, `on_after_start`,
//! `on_before_stop`, `on_after_stop`, each running exactly once). "Exactly
//! once" falls out of the state machine itself — `Start`/`Stop` may each
//! only be called once per runtime (a second call is rejected by
//! [`crate::state::RuntimeState::validate_transition`]), so the hook call
//! sites in [`crate::runtime::ServiceRuntime`] never repeat.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use svc_core::ServiceError;

pub type HookFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    pub on_before_start: Option<HookFn>,
    pub on_after_start: Option<HookFn>,
    pub on_before_stop: Option<HookFn>,
    pub on_after_stop: Option<HookFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before_start(mut self, f: HookFn) -> Self {
        self.on_before_start = Some(f);
        self
    }

    pub fn with_after_start(mut self, f: HookFn) -> Self {
        self.on_after_start = Some(f);
        self
    }

    pub fn with_before_stop(mut self, f: HookFn) -> Self {
        self.on_before_stop = Some(f);
        self
    }

    pub fn with_after_stop(mut self, f: HookFn) -> Self {
        self.on_after_stop = Some(f);
        self
    }

    pub(crate) async fn run(hook: &Option<HookFn>) -> Result<(), ServiceError> {
        match hook {
            Some(f) => f().await,
            None => Ok(()),
        }
    }
}
