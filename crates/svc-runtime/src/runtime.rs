//! [`ServiceRuntime`]: the lifecycle frame around one business service
//! instance (spec.md §4.3).

use crate::hooks::Hooks;
use crate::state::RuntimeState;
use std::sync::Arc;
use svc_capability::CapabilityOs;
use svc_core::{aggregate_health, HealthStatus, Request, RuntimeComponent, ServiceError};
use tokio::sync::Mutex;

use crate::service::BusinessService;

pub struct ServiceRuntime<S: BusinessService> {
    service: S,
    capability_os: Arc<CapabilityOs>,
    store: Arc<dyn RuntimeComponent>,
    hooks: Hooks,
    state: Mutex<RuntimeState>,
}

impl<S: BusinessService> ServiceRuntime<S> {
    pub fn new(
        service: S,
        capability_os: Arc<CapabilityOs>,
        store: Arc<dyn RuntimeComponent>,
        hooks: Hooks,
    ) -> Self {
        Self {
            service,
            capability_os,
            store,
            hooks,
            state: Mutex::new(RuntimeState::Created),
        }
    }

    pub async fn state(&self) -> RuntimeState {
        *self.state.lock().await
    }

    pub fn service_type(&self) -> &str {
        self.service.service_type()
    }

    pub fn capability_os(&self) -> &CapabilityOs {
        &self.capability_os
    }

    async fn transition(&self, next: RuntimeState) -> Result<(), ServiceError> {
        let mut guard = self.state.lock().await;
        guard.validate_transition(next)?;
        *guard = next;
        Ok(())
    }

    /// Acquires and initializes the enclave, then the store, in that
    /// order; a failure at either point moves the runtime to `Failed`
    /// rather than leaving it half-started.
    pub async fn start(&self) -> Result<(), ServiceError> {
        self.transition(RuntimeState::Starting).await?;
        if let Err(err) = self.start_inner().await {
            self.force_fail().await;
            return Err(err);
        }
        self.transition(RuntimeState::Running).await
    }

    async fn start_inner(&self) -> Result<(), ServiceError> {
        Hooks::run(&self.hooks.on_before_start).await?;
        self.capability_os.start().await?;
        self.store.start().await?;
        Hooks::run(&self.hooks.on_after_start).await?;
        Ok(())
    }

    /// Tears down the store, then the enclave — the reverse of start
    /// order.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        self.transition(RuntimeState::Stopping).await?;
        if let Err(err) = self.stop_inner().await {
            self.force_fail().await;
            return Err(err);
        }
        self.transition(RuntimeState::Stopped).await
    }

    async fn stop_inner(&self) -> Result<(), ServiceError> {
        Hooks::run(&self.hooks.on_before_stop).await?;
        self.store.stop().await?;
        self.capability_os.stop().await?;
        Hooks::run(&self.hooks.on_after_stop).await?;
        Ok(())
    }

    async fn force_fail(&self) {
        *self.state.lock().await = RuntimeState::Failed;
    }

    /// Succeeds iff the runtime is `Running` and every owned component
    /// reports healthy (spec.md §4.3).
    pub async fn health(&self) -> HealthStatus {
        if self.state().await != RuntimeState::Running {
            return HealthStatus::Unhealthy;
        }
        let components: [&(dyn RuntimeComponent + Sync); 2] =
            [self.capability_os.as_ref(), self.store.as_ref()];
        aggregate_health(&components).await
    }

    /// Dispatches a request whose `service_type` matches this runtime's
    /// service. The runtime does not retry; retries live in the
    /// dispatcher (spec.md §4.3).
    pub async fn handle(&self, request: &Request) -> Result<Vec<u8>, ServiceError> {
        if request.service_type != self.service.service_type() {
            return Err(ServiceError::NotFound(format!(
                "service_type '{}'",
                request.service_type
            )));
        }
        if self.state().await != RuntimeState::Running {
            return Err(ServiceError::Internal("runtime is not running".into()));
        }
        self.service.handle(request, &self.capability_os).await
    }
}
