//! The Contract capability surface (spec.md §4.2, §4.6).
//!
//! The actual gateway wire protocol lives in `svc-gateway`; this surface
//! only gates access to it behind the manifest and forwards calls, so a
//! service without the `Contract` capability cannot reach the chain at
//! all, even indirectly.

use async_trait::async_trait;
use std::sync::Arc;
use svc_core::{Capability, Manifest, Nonce, RequestId, ServiceError};

#[derive(Debug, Clone)]
pub struct ServiceRequestEvent {
    pub request_id: RequestId,
    pub user_contract: Option<String>,
    pub caller: String,
    pub service_type: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CallbackResponse {
    pub request_id: RequestId,
    pub nonce: Nonce,
    pub result: Result<Vec<u8>, String>,
    pub signature: Vec<u8>,
}

pub struct Subscription {
    pub id: String,
}

/// Implemented by `svc-gateway`'s bridge; injected into the capability
/// facade so plug-ins never hold a direct reference to the chain client.
#[async_trait]
pub trait ContractClient: Send + Sync {
    async fn subscribe(
        &self,
        handler: Arc<dyn Fn(ServiceRequestEvent) + Send + Sync>,
    ) -> Result<Subscription, ServiceError>;

    async fn send_callback(&self, response: CallbackResponse) -> Result<(), ServiceError>;
}

pub struct Contract {
    manifest: Arc<Manifest>,
    client: Arc<dyn ContractClient>,
}

impl Contract {
    pub fn new(manifest: Arc<Manifest>, client: Arc<dyn ContractClient>) -> Self {
        Self { manifest, client }
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.manifest.grants(Capability::Contract) {
            Ok(())
        } else {
            Err(ServiceError::capability_denied("Contract"))
        }
    }

    pub async fn subscribe_requests(
        &self,
        handler: Arc<dyn Fn(ServiceRequestEvent) + Send + Sync>,
    ) -> Result<Subscription, ServiceError> {
        self.check()?;
        self.client.subscribe(handler).await
    }

    pub async fn send_callback(&self, response: CallbackResponse) -> Result<(), ServiceError> {
        self.check()?;
        self.client.send_callback(response).await
    }
}
