//! `GatewayBridge` (spec.md §4.6): the inbound `ServiceRequest` ingestion
//! path (dedup + insert + enqueue) and the outbound `Fulfill`/`Fail`
//! delivery path (nonce assignment, RPC call, reconciliation on failure).

use crate::nonce::NonceCounter;
use crate::rpc::{account_id_from_caller, GatewayEventSource, GatewayRpcClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use svc_capability::contract::{CallbackResponse, ContractClient, ServiceRequestEvent, Subscription};
use svc_core::{
    DeliverySink, DispatchSink, ErrorKind, Fulfillment, FulfillmentOutcome, Origin, Request, RequestId,
    ServiceError,
};
use svc_store::{GatewayOutcome, RequestStore};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Backoff/deadline policy for the outbound reconciliation loop (spec.md
/// §4.6 outbound step 4).
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationConfig {
    pub poll_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub terminal_deadline: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            terminal_deadline: Duration::from_secs(3600),
        }
    }
}

struct PendingDelivery {
    fulfillment: Fulfillment,
    first_attempted_at: Instant,
    next_retry_at: Instant,
    backoff: Duration,
}

type EventHandler = Arc<dyn Fn(ServiceRequestEvent) + Send + Sync>;

pub struct GatewayBridge {
    rpc: Arc<dyn GatewayRpcClient>,
    store: Arc<dyn RequestStore>,
    dispatch: Arc<dyn DispatchSink>,
    nonce: NonceCounter,
    config: ReconciliationConfig,
    pending: Mutex<HashMap<RequestId, PendingDelivery>>,
    listeners: Mutex<Vec<EventHandler>>,
}

impl GatewayBridge {
    pub fn new(
        rpc: Arc<dyn GatewayRpcClient>,
        store: Arc<dyn RequestStore>,
        dispatch: Arc<dyn DispatchSink>,
    ) -> Self {
        Self::with_config(rpc, store, dispatch, ReconciliationConfig::default())
    }

    pub fn with_config(
        rpc: Arc<dyn GatewayRpcClient>,
        store: Arc<dyn RequestStore>,
        dispatch: Arc<dyn DispatchSink>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            rpc,
            store,
            dispatch,
            nonce: NonceCounter::new(),
            config,
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn next_nonce(&self) -> svc_core::Nonce {
        self.nonce.next()
    }

    /// Inbound path (spec.md §4.6): dedup by id, insert `Pending`, enqueue
    /// to the dispatcher. Re-emitting the same event is a silent no-op —
    /// "idempotent ingest" (spec.md §8 property 8).
    pub async fn handle_event(&self, event: ServiceRequestEvent) -> Result<(), ServiceError> {
        if self.store.get_by_id(event.request_id).await.is_ok() {
            tracing::debug!(request_id = %event.request_id, "duplicate ServiceRequest event ignored");
            return Ok(());
        }

        let mut request = Request::new(
            Origin::OnChain,
            event.service_type.clone(),
            account_id_from_caller(&event.caller),
            event.caller.clone(),
            event.payload.clone(),
        );
        request.id = event.request_id;
        request.user_contract = event.user_contract.clone();

        match self.store.create(request).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Internal => return Err(err),
            Err(_) => {
                // A concurrent insert raced us; treat as the same dedup case.
                return Ok(());
            }
        }

        self.dispatch.enqueue(event.request_id).await?;

        let listeners = self.listeners.lock().await;
        for listener in listeners.iter() {
            listener(event.clone());
        }
        Ok(())
    }

    /// Runs the inbound poll loop until `source` errors terminally or the
    /// task is aborted by its caller.
    pub async fn run_ingest_loop(self: Arc<Self>, source: Arc<dyn GatewayEventSource>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match source.poll_events().await {
                Ok(events) => {
                    for event in events {
                        if let Err(err) = self.handle_event(event).await {
                            tracing::warn!(error = %err, "failed to ingest gateway event");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "gateway event poll failed");
                }
            }
        }
    }

    /// Attempts immediate delivery; on a retryable failure, the
    /// fulfillment is queued for the reconciliation loop rather than
    /// surfaced as an error — the request remains `Processing` (spec.md
    /// §4.6 outbound step 4).
    async fn attempt_delivery(&self, fulfillment: Fulfillment) -> Result<(), ServiceError> {
        let outcome = self.call_rpc(&fulfillment).await;
        match outcome {
            Ok(()) => self.finalize_or_mark_replay(fulfillment).await,
            Err(err) if err.kind().is_retryable() || err.kind() == ErrorKind::CircuitOpen => {
                tracing::warn!(
                    request_id = %fulfillment.request_id,
                    error = %err,
                    "gateway delivery failed, queued for reconciliation"
                );
                self.queue_for_retry(fulfillment).await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn call_rpc(&self, fulfillment: &Fulfillment) -> Result<(), ServiceError> {
        match &fulfillment.outcome {
            FulfillmentOutcome::Completed(result) => {
                self.rpc
                    .fulfill(
                        fulfillment.request_id,
                        result.clone(),
                        fulfillment.nonce,
                        fulfillment.signature.clone(),
                    )
                    .await
            }
            FulfillmentOutcome::Failed(reason) => {
                self.rpc
                    .fail(
                        fulfillment.request_id,
                        reason.clone(),
                        fulfillment.nonce,
                        fulfillment.signature.clone(),
                    )
                    .await
            }
        }
    }

    async fn finalize(&self, fulfillment: Fulfillment) -> Result<(), ServiceError> {
        let outcome = match fulfillment.outcome {
            FulfillmentOutcome::Completed(bytes) => GatewayOutcome::Completed(bytes),
            FulfillmentOutcome::Failed(reason) => GatewayOutcome::Failed(reason),
        };
        self.store
            .finalize_gateway_callback(fulfillment.request_id, fulfillment.nonce, outcome)
            .await
    }

    /// Same as [`GatewayBridge::finalize`], except a replayed nonce is
    /// treated as the terminal failure spec.md §7 defines it as
    /// (`DuplicateNonce` — "terminal failure with reason `replay`")
    /// rather than an error the caller retries or merely logs.
    async fn finalize_or_mark_replay(&self, fulfillment: Fulfillment) -> Result<(), ServiceError> {
        let request_id = fulfillment.request_id;
        match self.finalize(fulfillment).await {
            Err(err) if err.kind() == ErrorKind::DuplicateNonce => {
                tracing::error!(request_id = %request_id, "replayed nonce on gateway callback");
                self.store
                    .update_status(request_id, svc_core::RequestStatus::Failed, None, Some("replay".to_string()))
                    .await
            }
            other => other,
        }
    }

    async fn queue_for_retry(&self, fulfillment: Fulfillment) {
        let mut pending = self.pending.lock().await;
        let now = Instant::now();
        pending
            .entry(fulfillment.request_id)
            .and_modify(|entry| {
                entry.backoff = (entry.backoff * 2).min(self.config.max_backoff);
                entry.next_retry_at = now + entry.backoff;
            })
            .or_insert_with(|| PendingDelivery {
                fulfillment,
                first_attempted_at: now,
                next_retry_at: now + self.config.initial_backoff,
                backoff: self.config.initial_backoff,
            });
    }

    /// Drains due entries from the reconciliation queue, retrying
    /// delivery and marking a request `Failed` with `gateway-unreachable`
    /// once its terminal deadline has passed (spec.md §4.6 outbound step
    /// 4).
    pub async fn reconcile_once(&self) {
        let now = Instant::now();
        let due: Vec<RequestId> = {
            let pending = self.pending.lock().await;
            pending
                .iter()
                .filter(|(_, entry)| entry.next_retry_at <= now)
                .map(|(id, _)| *id)
                .collect()
        };

        for id in due {
            let (fulfillment, expired) = {
                let pending = self.pending.lock().await;
                match pending.get(&id) {
                    Some(entry) => (
                        entry.fulfillment.clone(),
                        entry.first_attempted_at.elapsed() >= self.config.terminal_deadline,
                    ),
                    None => continue,
                }
            };

            if expired {
                tracing::error!(request_id = %id, "gateway unreachable past terminal deadline");
                let _ = self
                    .store
                    .update_status(
                        id,
                        svc_core::RequestStatus::Failed,
                        None,
                        Some("gateway-unreachable".to_string()),
                    )
                    .await;
                self.pending.lock().await.remove(&id);
                continue;
            }

            match self.call_rpc(&fulfillment).await {
                Ok(()) => {
                    if self.finalize_or_mark_replay(fulfillment).await.is_ok() {
                        self.pending.lock().await.remove(&id);
                    }
                }
                Err(err) => {
                    tracing::debug!(request_id = %id, error = %err, "reconciliation attempt still failing");
                    self.queue_for_retry(fulfillment).await;
                }
            }
        }
    }

    /// Runs [`GatewayBridge::reconcile_once`] on `config.poll_interval`
    /// until aborted.
    pub async fn run_reconciliation_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            ticker.tick().await;
            self.reconcile_once().await;
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait::async_trait]
impl DeliverySink for GatewayBridge {
    async fn deliver(&self, fulfillment: Fulfillment) -> Result<(), ServiceError> {
        self.attempt_delivery(fulfillment).await
    }
}

/// Exposes the bridge through the Contract capability surface (spec.md
/// §4.2): a service holding the `Contract` capability can subscribe to
/// raw `ServiceRequest` events and submit callbacks through the same
/// nonce/delivery machinery the core dispatch path uses.
#[async_trait::async_trait]
impl ContractClient for GatewayBridge {
    async fn subscribe(&self, handler: EventHandler) -> Result<Subscription, ServiceError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.listeners.lock().await.push(handler);
        Ok(Subscription { id })
    }

    async fn send_callback(&self, response: CallbackResponse) -> Result<(), ServiceError> {
        let outcome = match response.result {
            Ok(bytes) => FulfillmentOutcome::Completed(bytes),
            Err(reason) => FulfillmentOutcome::Failed(reason),
        };
        self.deliver(Fulfillment {
            request_id: response.request_id,
            nonce: response.nonce,
            outcome,
            signature: response.signature,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use svc_store::memory::InMemoryStore;

    struct RecordingDispatch {
        enqueued: Mutex<Vec<RequestId>>,
    }

    #[async_trait]
    impl DispatchSink for RecordingDispatch {
        async fn enqueue(&self, id: RequestId) -> Result<(), ServiceError> {
            self.enqueued.lock().await.push(id);
            Ok(())
        }

        fn is_registered(&self, _service_type: &str) -> bool {
            true
        }

        fn has_capacity(&self) -> bool {
            true
        }
    }

    struct FlakyRpc {
        failures_remaining: AtomicUsize,
    }

    #[async_trait]
    impl GatewayRpcClient for FlakyRpc {
        async fn fulfill(
            &self,
            _request_id: RequestId,
            _result: Vec<u8>,
            _nonce: svc_core::Nonce,
            _signature: Vec<u8>,
        ) -> Result<(), ServiceError> {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(ServiceError::Transient("upstream unavailable".into()));
            }
            Ok(())
        }

        async fn fail(
            &self,
            _request_id: RequestId,
            _reason: String,
            _nonce: svc_core::Nonce,
            _signature: Vec<u8>,
        ) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn event(request_id: RequestId) -> ServiceRequestEvent {
        ServiceRequestEvent {
            request_id,
            user_contract: Some("0xUser".into()),
            caller: "0xCaller".into(),
            service_type: "oracle".into(),
            payload: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn duplicate_event_does_not_duplicate_insert_or_enqueue() {
        let store = Arc::new(InMemoryStore::new());
        let dispatch = Arc::new(RecordingDispatch {
            enqueued: Mutex::new(Vec::new()),
        });
        let rpc = Arc::new(FlakyRpc {
            failures_remaining: AtomicUsize::new(0),
        });
        let bridge = GatewayBridge::new(rpc, store.clone(), dispatch.clone());

        let id = RequestId::new();
        bridge.handle_event(event(id)).await.unwrap();
        bridge.handle_event(event(id)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(dispatch.enqueued.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_is_queued_then_reconciled() {
        let store = Arc::new(InMemoryStore::new());
        let dispatch = Arc::new(RecordingDispatch {
            enqueued: Mutex::new(Vec::new()),
        });
        let rpc = Arc::new(FlakyRpc {
            failures_remaining: AtomicUsize::new(1),
        });
        let bridge = GatewayBridge::with_config(
            rpc,
            store.clone(),
            dispatch,
            ReconciliationConfig {
                poll_interval: Duration::from_millis(10),
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(50),
                terminal_deadline: Duration::from_secs(3600),
            },
        );

        let id = RequestId::new();
        let event = event(id);
        bridge.handle_event(event.clone()).await.unwrap();
        store.claim(id).await.unwrap();

        let fulfillment = Fulfillment {
            request_id: id,
            nonce: bridge.next_nonce(),
            outcome: FulfillmentOutcome::Completed(vec![9]),
            signature: vec![0xAB],
        };
        bridge.deliver(fulfillment).await.unwrap();
        assert_eq!(bridge.pending_count().await, 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        bridge.reconcile_once().await;
        assert_eq!(bridge.pending_count().await, 0);

        let stored = store.get_by_id(id).await.unwrap();
        assert_eq!(stored.status, svc_core::RequestStatus::Completed);
    }
}
