//! `oracle`: a reference [`BusinessService`] plug-in (SPEC_FULL.md's
//! supplemented "example service" module). Demonstrates the shape every
//! real plug-in takes: a `service_type`, a `handle` that reaches into the
//! `CapabilityOs` it is given rather than holding any capability itself,
//! and nothing else — lifecycle, retries, signing, and delivery all live
//! one layer up, in `svc-runtime`/`svc-dispatcher`.
//!
//! The request payload is the UTF-8 URL to fetch; the result is the raw
//! response body. A production plug-in would parse/validate both ends far
//! more strictly — this one stays deliberately thin since its purpose is
//! to exercise the Network capability end to end, not to model a real
//! price feed.

use svc_capability::CapabilityOs;
use svc_core::{Request, ServiceError};
use svc_resilience::OutboundRequest;
use svc_runtime::BusinessService;

pub struct OracleService;

#[async_trait::async_trait]
impl BusinessService for OracleService {
    fn service_type(&self) -> &str {
        "oracle"
    }

    async fn handle(&self, request: &Request, os: &CapabilityOs) -> Result<Vec<u8>, ServiceError> {
        let url = std::str::from_utf8(&request.payload)
            .map_err(|e| ServiceError::BadRequest(format!("payload is not a UTF-8 URL: {e}")))?;

        let deadline = tokio::time::Instant::now()
            + std::time::Duration::from_millis(os.manifest().resource_limits.max_compute_ms);
        let outbound = OutboundRequest::get(url.to_string(), deadline);

        let response = os.network.fetch(outbound).await?;
        if response.status >= 400 {
            return Err(ServiceError::Internal(format!(
                "oracle upstream returned status {}",
                response.status
            )));
        }
        Ok(response.body)
    }
}
