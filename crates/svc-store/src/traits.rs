//! The `RequestStore` contract (spec.md §4.4, §9 "collapse duck-typed
//! Store/Repository/DB interfaces into one `RequestStore` interface").
//! Both implementations in this crate satisfy the same contract; swapping
//! them changes only durability, never semantics.

use svc_core::{AccountId, Nonce, Request, RequestId, RequestStatus, ServiceError};

/// Optional filters for [`RequestStore::list`].
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub service_type: Option<String>,
    pub account_id: Option<AccountId>,
}

/// The terminal outcome a gateway callback finalizes a request with.
#[derive(Debug, Clone)]
pub enum GatewayOutcome {
    Completed(Vec<u8>),
    Failed(String),
}

#[async_trait::async_trait]
pub trait RequestStore: Send + Sync {
    async fn create(&self, request: Request) -> Result<(), ServiceError>;

    async fn get_by_id(&self, id: RequestId) -> Result<Request, ServiceError>;

    /// Atomically transitions `Pending -> Processing` and returns the
    /// claimed request; a concurrent claim on the same id returns
    /// `AlreadyClaimed` (spec.md §4.8: "no two workers may claim the same
    /// request").
    async fn claim(&self, id: RequestId) -> Result<Request, ServiceError>;

    /// Writes a terminal status together with its result/error atomically
    /// (spec.md §4.4: "the pair (write terminal status, write
    /// result/error) is atomic").
    async fn update_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        result: Option<Vec<u8>>,
        error: Option<String>,
    ) -> Result<(), ServiceError>;

    async fn count(&self) -> Result<u64, ServiceError>;

    async fn list(&self, filter: RequestFilter, limit: usize, offset: usize) -> Result<Vec<Request>, ServiceError>;

    /// Inserts `nonce` into the ledger; fails with `DuplicateNonce` if
    /// already present.
    async fn mark_nonce_observed(&self, nonce: Nonce) -> Result<(), ServiceError>;

    /// The gateway-callback transaction: check nonce absence, insert the
    /// nonce, and write the terminal status, all atomically (spec.md
    /// §4.4, §4.6 step 3). `AlreadyClaimed`-free: this is only ever
    /// called on a request already `Processing`.
    async fn finalize_gateway_callback(
        &self,
        id: RequestId,
        nonce: Nonce,
        outcome: GatewayOutcome,
    ) -> Result<(), ServiceError>;
}
