//! Type-erased service registry (spec.md §4.8): lets the dispatcher hold
//! one `ServiceRuntime<S>` per plugged-in business service behind a single
//! `service_type -> Arc<dyn DynService>` map, swapped atomically on write —
//! the same read-heavy, snapshot-on-write policy `svc_core::manifest::Registry`
//! uses for service registrations.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use svc_core::{HealthStatus, Request, ServiceError};
use svc_runtime::{BusinessService, ServiceRuntime};

/// The dispatcher's view of one runnable service, with its `BusinessService`
/// type erased so a heterogeneous set of plug-ins can share one map.
#[async_trait::async_trait]
pub trait DynService: Send + Sync {
    fn service_type(&self) -> &str;

    /// The deadline used when a request carries no other hint (spec.md
    /// §4.8: "service default, else a global default" — derived from the
    /// service's own `Manifest.resource_limits.max_compute_ms`).
    fn default_deadline(&self) -> Duration;

    async fn handle(&self, request: &Request) -> Result<Vec<u8>, ServiceError>;

    async fn health(&self) -> HealthStatus;
}

#[async_trait::async_trait]
impl<S> DynService for ServiceRuntime<S>
where
    S: BusinessService + Send + Sync + 'static,
{
    fn service_type(&self) -> &str {
        ServiceRuntime::service_type(self)
    }

    fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.capability_os().manifest().resource_limits.max_compute_ms)
    }

    async fn handle(&self, request: &Request) -> Result<Vec<u8>, ServiceError> {
        ServiceRuntime::handle(self, request).await
    }

    async fn health(&self) -> HealthStatus {
        ServiceRuntime::health(self).await
    }
}

/// Read-mostly `service_type -> Arc<dyn DynService>` map.
#[derive(Default)]
pub struct ServiceRegistry {
    inner: ArcSwap<HashMap<String, Arc<dyn DynService>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn get(&self, service_type: &str) -> Option<Arc<dyn DynService>> {
        self.inner.load().get(service_type).cloned()
    }

    pub fn register(&self, service: Arc<dyn DynService>) {
        self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(service.service_type().to_string(), service.clone());
            next
        });
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
