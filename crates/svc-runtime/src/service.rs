//! The business-logic seam a plug-in service implements (spec.md §4.3,
//! §9 "per-service plug-in modules registering themselves with the
//! Dispatcher via a service-type tag"). `svc-oracle` is the reference
//! implementation of this trait.

use svc_capability::CapabilityOs;
use svc_core::{Request, ServiceError};

/// One plug-in's business logic, invoked by the runtime under its own
/// capability façade. Implementations validate the request payload's
/// shape themselves before doing any privileged work.
#[async_trait::async_trait]
pub trait BusinessService: Send + Sync {
    /// The `service_type` tag this implementation registers under.
    fn service_type(&self) -> &str;

    /// Performs the work and returns the raw result payload. Signing
    /// happens afterward, at the dispatcher, once the gateway nonce (if
    /// any) is known (spec.md §4.5).
    async fn handle(&self, request: &Request, os: &CapabilityOs) -> Result<Vec<u8>, ServiceError>;
}
