//! In-memory reference store (spec.md §4.4: "an in-memory reference store
//! for tests"). A single mutex guards both the request map and the nonce
//! ledger together, which is what makes [`InMemoryStore::finalize_gateway_callback`]'s
//! check-insert-write sequence atomic without a separate transaction
//! primitive.

use crate::traits::{GatewayOutcome, RequestFilter, RequestStore};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use svc_core::{HealthStatus, Nonce, Request, RequestId, RequestStatus, RuntimeComponent, ServiceError};

#[derive(Default)]
struct State {
    requests: HashMap<RequestId, Request>,
    nonces: HashSet<Nonce>,
}

pub struct InMemoryStore {
    state: Mutex<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait::async_trait]
impl RequestStore for InMemoryStore {
    async fn create(&self, request: Request) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if state.requests.contains_key(&request.id) {
            return Ok(());
        }
        state.requests.insert(request.id, request);
        Ok(())
    }

    async fn get_by_id(&self, id: RequestId) -> Result<Request, ServiceError> {
        self.lock()
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("request {id}")))
    }

    async fn claim(&self, id: RequestId) -> Result<Request, ServiceError> {
        let mut state = self.lock();
        let request = state
            .requests
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("request {id}")))?;
        if request.status != RequestStatus::Pending {
            return Err(ServiceError::AlreadyClaimed(id.to_string()));
        }
        request.start_processing()?;
        Ok(request.clone())
    }

    async fn update_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        result: Option<Vec<u8>>,
        error: Option<String>,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        let request = state
            .requests
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("request {id}")))?;
        match status {
            RequestStatus::Completed => request.complete(result.unwrap_or_default())?,
            RequestStatus::Failed => request.fail(error.unwrap_or_default())?,
            RequestStatus::Processing => request.start_processing()?,
            RequestStatus::Pending => {
                return Err(ServiceError::InvalidTransition {
                    from: request.status.as_str(),
                    to: "pending",
                })
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64, ServiceError> {
        Ok(self.lock().requests.len() as u64)
    }

    async fn list(&self, filter: RequestFilter, limit: usize, offset: usize) -> Result<Vec<Request>, ServiceError> {
        let state = self.lock();
        let mut matches: Vec<Request> = state
            .requests
            .values()
            .filter(|r| match filter.status {
                Some(s) => r.status == s,
                None => true,
            })
            .filter(|r| match &filter.service_type {
                Some(t) => &r.service_type == t,
                None => true,
            })
            .filter(|r| match &filter.account_id {
                Some(a) => &r.account_id == a,
                None => true,
            })
            .cloned()
            .collect();
        matches.sort_by_key(|r| r.created_at);
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    async fn mark_nonce_observed(&self, nonce: Nonce) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if !state.nonces.insert(nonce) {
            return Err(ServiceError::DuplicateNonce(nonce.0));
        }
        Ok(())
    }

    async fn finalize_gateway_callback(
        &self,
        id: RequestId,
        nonce: Nonce,
        outcome: GatewayOutcome,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if state.nonces.contains(&nonce) {
            return Err(ServiceError::DuplicateNonce(nonce.0));
        }
        let request = state
            .requests
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("request {id}")))?;
        match outcome {
            GatewayOutcome::Completed(result) => request.complete(result)?,
            GatewayOutcome::Failed(reason) => request.fail(reason)?,
        }
        state.nonces.insert(nonce);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RuntimeComponent for InMemoryStore {
    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svc_core::{AccountId, Origin};

    fn sample() -> Request {
        Request::new(Origin::Http, "oracle", AccountId::from("acct"), "caller", vec![1, 2])
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryStore::new();
        let request = sample();
        let id = request.id;
        store.create(request).await.unwrap();

        store.claim(id).await.unwrap();
        let err = store.claim(id).await.unwrap_err();
        assert_eq!(err.kind(), svc_core::ErrorKind::AlreadyClaimed);
    }

    #[tokio::test]
    async fn finalize_rejects_replayed_nonce() {
        let store = InMemoryStore::new();
        let request = sample();
        let id = request.id;
        store.create(request).await.unwrap();
        store.claim(id).await.unwrap();

        store
            .finalize_gateway_callback(id, Nonce(42), GatewayOutcome::Completed(vec![9]))
            .await
            .unwrap();

        let request2 = sample();
        let id2 = request2.id;
        store.create(request2).await.unwrap();
        store.claim(id2).await.unwrap();
        let err = store
            .finalize_gateway_callback(id2, Nonce(42), GatewayOutcome::Failed("replay?".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), svc_core::ErrorKind::DuplicateNonce);

        let stored = store.get_by_id(id2).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Processing);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = InMemoryStore::new();
        let pending = sample();
        let mut processing = sample();
        processing.start_processing().unwrap();
        store.create(pending).await.unwrap();
        store.create(processing).await.unwrap();

        let only_processing = store
            .list(
                RequestFilter {
                    status: Some(RequestStatus::Processing),
                    ..Default::default()
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(only_processing.len(), 1);
        assert_eq!(only_processing[0].status, RequestStatus::Processing);
    }
}
