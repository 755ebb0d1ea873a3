//! Cross-crate seams between ingress, the dispatcher, and outbound
//! delivery (spec.md §2 data flow, §4.8). Kept in `svc-core` rather than
//! in `svc-dispatcher` itself so that `svc-gateway` and `svc-http` — both
//! upstream of the dispatcher in the data flow — can implement/consume
//! these without depending on the dispatcher crate, and so the dispatcher
//! can depend on `svc-gateway` for outbound delivery without a cycle.

use crate::error::ServiceError;
use crate::ids::{Nonce, RequestId};
use crate::request::Request;
use std::time::Duration;

/// Where an ingress hands a newly created `Pending` request off to the
/// dispatcher's work queue (spec.md §2: "Gateway-Bridge / HTTP-Ingress →
/// Dispatcher").
///
/// The queue behind `enqueue` is bounded (spec.md §5: "queue depth is
/// bounded and insertion blocks with backpressure when full") —
/// `enqueue` itself backpressures by awaiting send. `is_registered`/
/// `has_capacity` exist so an ingress can reject *synchronously* instead
/// (spec.md §6: `POST /requests` may answer `503 service unavailable`
/// rather than accepting a request it already knows it cannot route or
/// admit).
#[async_trait::async_trait]
pub trait DispatchSink: Send + Sync {
    async fn enqueue(&self, id: RequestId) -> Result<(), ServiceError>;

    /// Whether `service_type` has a registered handler.
    fn is_registered(&self, service_type: &str) -> bool;

    /// Whether the work queue currently has free capacity.
    fn has_capacity(&self) -> bool;
}

/// The terminal outcome of a request's business logic, signed and ready
/// for on-chain delivery.
#[derive(Debug, Clone)]
pub enum FulfillmentOutcome {
    Completed(Vec<u8>),
    Failed(String),
}

/// A signed `(request_id, outcome, nonce, signature)` tuple — the exact
/// shape the Gateway Bridge assembles into `Fulfill`/`Fail` (spec.md §4.5,
/// §6).
#[derive(Debug, Clone)]
pub struct Fulfillment {
    pub request_id: RequestId,
    pub nonce: Nonce,
    pub outcome: FulfillmentOutcome,
    pub signature: Vec<u8>,
}

/// Where the dispatcher hands a signed, on-chain-origin fulfillment off
/// for delivery (spec.md §4.8 step 4: "hand to Gateway Bridge ... for
/// delivery"). HTTP-origin requests never go through this seam — the
/// dispatcher writes their terminal status to the store directly, and the
/// HTTP Ingress reads it back via `GET /requests/{id}`.
#[async_trait::async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, fulfillment: Fulfillment) -> Result<(), ServiceError>;
}

/// Where the HTTP Ingress's service-specific synchronous routes (spec.md
/// §4.7: "accept a direct synchronous call — the Dispatcher runs the
/// service inline with a deadline and returns the signed result") reach
/// into the dispatcher without `svc-http` depending on `svc-dispatcher`
/// directly.
#[async_trait::async_trait]
pub trait InlineDispatcher: Send + Sync {
    /// Returns `(result_bytes, signature)` on success.
    async fn dispatch_inline(&self, request: Request, deadline: Duration) -> Result<(Vec<u8>, Vec<u8>), ServiceError>;
}
