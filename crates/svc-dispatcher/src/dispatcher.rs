//! The Dispatcher (spec.md §4.8): routes claimed requests to their
//! registered service by `service_type`, enforces a deadline, retries
//! transient handler failures with the same backoff policy
//! `svc_resilience::RetryConfig` describes for outbound calls, recovers
//! from a handler panic rather than taking the worker down with it, and
//! hands the signed terminal outcome off to the store (HTTP-origin) or the
//! Gateway Bridge (on-chain-origin).

use crate::registry::{DynService, ServiceRegistry};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Duration;
use svc_core::{
    DeliverySink, DispatchSink, Fulfillment, FulfillmentOutcome, InlineDispatcher, Origin, Request, RequestId,
    RequestStatus, ServiceError,
};
use svc_gateway::GatewayBridge;
use svc_resilience::RetryConfig;
use svc_signer::AttestationSigner;
use svc_store::RequestStore;
use tokio::sync::{mpsc, Mutex, Semaphore};

/// Tuning knobs for the dispatcher's worker pool and retry policy.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Used as a ceiling alongside each service's own deadline (spec.md
    /// §4.8: "service default, else a global default" — the "request
    /// hint" tier dropped since `Request` carries none).
    pub global_default_deadline: Duration,
    pub retry: RetryConfig,
    /// Maximum number of requests handled concurrently (spec.md §4.8:
    /// "bounded worker pool").
    pub worker_concurrency: usize,
    /// Maximum number of claimed-but-not-yet-running requests the queue
    /// holds before `enqueue` backpressures (spec.md §5: "queue depth is
    /// bounded and insertion blocks with backpressure when full").
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            global_default_deadline: Duration::from_secs(30),
            retry: RetryConfig::default(),
            worker_concurrency: 16,
            queue_capacity: 256,
        }
    }
}

/// Routes requests to registered services, retries, signs, and delivers.
///
/// Holds `svc-gateway`'s concrete `GatewayBridge` rather than a trait
/// object: the bridge exposes `next_nonce()` as an inherent method (it is
/// not part of any `svc-core` seam, since nonce assignment is the
/// dispatcher's business, not the gateway's), and `svc-gateway` has no
/// dependency back on this crate, so the concrete dependency introduces no
/// cycle. The bridge itself, however, is constructed from an
/// `Arc<dyn DispatchSink>` pointing back at this dispatcher, so the two
/// can't be built in a single straight-line sequence; `gateway` is an
/// `ArcSwapOption` wired in after both sides exist via [`Dispatcher::set_gateway`]
/// rather than passed to the constructor.
pub struct Dispatcher {
    services: ServiceRegistry,
    store: Arc<dyn RequestStore>,
    signer: Arc<AttestationSigner>,
    gateway: ArcSwapOption<GatewayBridge>,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    queue_tx: mpsc::Sender<RequestId>,
    queue_rx: Mutex<Option<mpsc::Receiver<RequestId>>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RequestStore>, signer: Arc<AttestationSigner>, config: DispatcherConfig) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        Arc::new(Self {
            services: ServiceRegistry::new(),
            store,
            signer,
            gateway: ArcSwapOption::empty(),
            semaphore: Arc::new(Semaphore::new(config.worker_concurrency.max(1))),
            config,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        })
    }

    pub fn register(&self, service: Arc<dyn DynService>) {
        self.services.register(service);
    }

    /// Wires in the Gateway Bridge once it has been constructed with this
    /// dispatcher as its `DispatchSink`. A deployment that never registers
    /// an on-chain-origin service can skip this; any request that reaches
    /// [`Origin::OnChain`] delivery without one is logged and dropped
    /// rather than panicking.
    pub fn set_gateway(&self, gateway: Arc<GatewayBridge>) {
        self.gateway.store(Some(gateway));
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Drains the work queue until the last [`DispatchSink`] handle is
    /// dropped, running up to `worker_concurrency` requests at a time.
    /// Must be called at most once per dispatcher.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .expect("Dispatcher::run called more than once");
        while let Some(id) = rx.recv().await {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("dispatcher semaphore never closes");
            let dispatcher = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                dispatcher.process_claimed(id).await;
            });
        }
    }

    async fn process_claimed(&self, id: RequestId) {
        let request = match self.store.claim(id).await {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(request_id = %id, error = %err, "not claimed, skipping");
                return;
            }
        };
        self.process(request).await;
    }

    async fn process(&self, request: Request) {
        match self.run_with_retry(&request).await {
            Ok(result) => self.complete(request, result).await,
            Err(err) => self.fail(request, err).await,
        }
    }

    /// Looks up the handler, resolves its deadline, and retries a transient
    /// failure up to `config.retry.max_retries` times with the retry
    /// crate's own backoff curve (spec.md §4.8 steps 3-6).
    async fn run_with_retry(&self, request: &Request) -> Result<Vec<u8>, ServiceError> {
        let service = self
            .services
            .get(&request.service_type)
            .ok_or_else(|| ServiceError::NotFound(format!("service_type '{}'", request.service_type)))?;
        let deadline = self.config.global_default_deadline.min(service.default_deadline());

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run_once(service.clone(), request.clone(), deadline).await {
                Ok(result) => return Ok(result),
                Err(err) if err.kind().is_retryable() && attempt <= self.config.retry.max_retries => {
                    let backoff = self.config.retry.base_backoff(attempt);
                    tracing::warn!(
                        request_id = %request.id,
                        attempt,
                        error = %err,
                        backoff = ?backoff,
                        "handler failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs one attempt under a deadline, isolated in its own task so a
    /// panic inside the handler surfaces as `Internal` rather than taking
    /// the worker (and every other in-flight request sharing its runtime)
    /// down with it (spec.md §7).
    async fn run_once(&self, service: Arc<dyn DynService>, request: Request, deadline: Duration) -> Result<Vec<u8>, ServiceError> {
        let mut handle = tokio::spawn(async move { service.handle(&request).await });
        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                if join_err.is_panic() {
                    Err(ServiceError::from_panic(join_err.into_panic().as_ref()))
                } else {
                    Err(ServiceError::Cancelled)
                }
            }
            Err(_) => {
                handle.abort();
                Err(ServiceError::DeadlineExceeded)
            }
        }
    }

    async fn complete(&self, request: Request, result: Vec<u8>) {
        match request.origin {
            Origin::Http => {
                if let Err(err) = self
                    .store
                    .update_status(request.id, RequestStatus::Completed, Some(result), None)
                    .await
                {
                    tracing::error!(request_id = %request.id, error = %err, "failed to persist completed status");
                }
            }
            Origin::OnChain => {
                self.deliver_onchain(request.id, FulfillmentOutcome::Completed(result)).await;
            }
        }
    }

    async fn fail(&self, request: Request, error: ServiceError) {
        match request.origin {
            Origin::Http => {
                if let Err(err) = self
                    .store
                    .update_status(request.id, RequestStatus::Failed, None, Some(error.to_string()))
                    .await
                {
                    tracing::error!(request_id = %request.id, error = %err, "failed to persist failed status");
                }
            }
            Origin::OnChain => {
                let reason = error.kind().gateway_reason().to_string();
                self.deliver_onchain(request.id, FulfillmentOutcome::Failed(reason)).await;
            }
        }
    }

    /// Assigns a nonce, signs the outcome, and hands it to the Gateway
    /// Bridge for delivery (spec.md §4.5, §4.8 step 6). A request that is
    /// `OnChain` with no bridge configured is a deployment error; it is
    /// logged rather than retried forever.
    async fn deliver_onchain(&self, request_id: RequestId, outcome: FulfillmentOutcome) {
        let Some(gateway) = self.gateway.load_full() else {
            tracing::error!(request_id = %request_id, "on-chain request with no gateway bridge configured");
            return;
        };

        let nonce = gateway.next_nonce();
        let payload = match &outcome {
            FulfillmentOutcome::Completed(bytes) => bytes.clone(),
            FulfillmentOutcome::Failed(reason) => reason.clone().into_bytes(),
        };

        let signed = match self.signer.sign(request_id, payload, nonce).await {
            Ok(signed) => signed,
            Err(err) => {
                tracing::error!(request_id = %request_id, error = %err, "failed to sign fulfillment");
                return;
            }
        };

        let fulfillment = Fulfillment {
            request_id,
            nonce,
            outcome,
            signature: signed.signature,
        };
        if let Err(err) = gateway.deliver(fulfillment).await {
            tracing::error!(request_id = %request_id, error = %err, "gateway delivery failed");
        }
    }
}

#[async_trait::async_trait]
impl DispatchSink for Dispatcher {
    /// Backpressures by awaiting a free queue slot (spec.md §5) rather
    /// than failing fast; callers that need a synchronous admission
    /// decision instead (e.g. the HTTP Ingress) should check
    /// `is_registered`/`has_capacity` before ever reaching this call.
    async fn enqueue(&self, id: RequestId) -> Result<(), ServiceError> {
        self.queue_tx
            .send(id)
            .await
            .map_err(|_| ServiceError::Internal("dispatcher queue closed".into()))
    }

    fn is_registered(&self, service_type: &str) -> bool {
        self.services.get(service_type).is_some()
    }

    fn has_capacity(&self) -> bool {
        self.queue_tx.capacity() > 0
    }
}

/// The HTTP Ingress's synchronous path: run the handler inline, under a
/// deadline, and return the signed result directly rather than going
/// through the store/queue (spec.md §4.7, §4.8).
#[async_trait::async_trait]
impl InlineDispatcher for Dispatcher {
    async fn dispatch_inline(&self, request: Request, deadline: Duration) -> Result<(Vec<u8>, Vec<u8>), ServiceError> {
        let service = self
            .services
            .get(&request.service_type)
            .ok_or_else(|| ServiceError::NotFound(format!("service_type '{}'", request.service_type)))?;
        let effective_deadline = deadline.min(service.default_deadline());
        let request_id = request.id;

        let result = self.run_once(service, request, effective_deadline).await?;
        let nonce = svc_core::Nonce(0);
        let signed = self.signer.sign(request_id, result.clone(), nonce).await?;
        Ok((result, signed.signature))
    }
}
