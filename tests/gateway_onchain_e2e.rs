//! End-to-end: the Gateway Bridge's inbound/outbound path (spec.md §8
//! "VRF request, on-chain origin", "Duplicate nonce attack", and property
//! 8 "idempotent ingest").

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use svc_capability::contract::ServiceRequestEvent;
use svc_capability::Keys;
use svc_core::{
    Capability, DeliverySink, DispatchSink, Fulfillment, FulfillmentOutcome, Manifest, Request, RequestId,
    RequestStatus, ResourceLimits, ServiceError,
};
use svc_dispatcher::{Dispatcher, DispatcherConfig, DynService};
use svc_gateway::{GatewayBridge, GatewayRpcClient, ReconciliationConfig};
use svc_signer::{AttestationSigner, SignedFulfillment};
use svc_store::memory::InMemoryStore;
use svc_store::RequestStore;
use tokio::sync::Mutex;

struct EchoService;

#[async_trait]
impl DynService for EchoService {
    fn service_type(&self) -> &str {
        "oracle"
    }

    fn default_deadline(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn handle(&self, request: &Request) -> Result<Vec<u8>, ServiceError> {
        Ok(request.payload.clone())
    }

    async fn health(&self) -> svc_core::HealthStatus {
        svc_core::HealthStatus::Healthy
    }
}

#[derive(Clone)]
struct RecordedCall {
    request_id: RequestId,
    result: Vec<u8>,
    nonce: svc_core::Nonce,
    signature: Vec<u8>,
}

struct RecordingRpc {
    fulfilled: Mutex<Vec<RecordedCall>>,
    failed: Mutex<Vec<RecordedCall>>,
}

impl RecordingRpc {
    fn new() -> Self {
        Self {
            fulfilled: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GatewayRpcClient for RecordingRpc {
    async fn fulfill(
        &self,
        request_id: RequestId,
        result: Vec<u8>,
        nonce: svc_core::Nonce,
        signature: Vec<u8>,
    ) -> Result<(), ServiceError> {
        self.fulfilled.lock().await.push(RecordedCall {
            request_id,
            result,
            nonce,
            signature,
        });
        Ok(())
    }

    async fn fail(
        &self,
        request_id: RequestId,
        reason: String,
        nonce: svc_core::Nonce,
        signature: Vec<u8>,
    ) -> Result<(), ServiceError> {
        self.failed.lock().await.push(RecordedCall {
            request_id,
            result: reason.into_bytes(),
            nonce,
            signature,
        });
        Ok(())
    }
}

fn event(request_id: RequestId, payload: Vec<u8>) -> ServiceRequestEvent {
    ServiceRequestEvent {
        request_id,
        user_contract: Some("0xVrfConsumer".into()),
        caller: "0xCaller".into(),
        service_type: "oracle".into(),
        payload,
    }
}

async fn signer() -> (Arc<AttestationSigner>, Vec<u8>) {
    let manifest = Arc::new(Manifest {
        service_id: "gateway-e2e".into(),
        required_capabilities: vec![Capability::Keys],
        requested_capabilities: vec![],
        resource_limits: ResourceLimits::default(),
        sealed_config_key: "gateway-e2e/config".into(),
    });
    let keys = Arc::new(Keys::new(manifest, [11u8; 32]));
    let signer = Arc::new(AttestationSigner::new("gateway-e2e", keys).await.unwrap());
    let public_key = signer.public_key().await.unwrap();
    (signer, public_key)
}

#[tokio::test]
async fn onchain_fulfillment_is_delivered_with_a_verifiable_signature() {
    let (signer, public_key) = signer().await;
    let store = Arc::new(InMemoryStore::new());
    let dispatcher = Dispatcher::new(store.clone(), signer, DispatcherConfig::default());
    dispatcher.register(Arc::new(EchoService) as Arc<dyn DynService>);

    let rpc = Arc::new(RecordingRpc::new());
    let bridge = Arc::new(GatewayBridge::new(
        rpc.clone(),
        store.clone(),
        dispatcher.clone() as Arc<dyn DispatchSink>,
    ));
    dispatcher.set_gateway(bridge.clone());

    tokio::spawn(dispatcher.clone().run());

    let id = RequestId::new();
    bridge.handle_event(event(id, b"vrf-seed".to_vec())).await.unwrap();

    for _ in 0..200 {
        if !rpc.fulfilled.lock().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let calls = rpc.fulfilled.lock().await;
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.request_id, id);
    assert_eq!(call.result, b"vrf-seed");

    let signed = SignedFulfillment {
        request_id: call.request_id,
        nonce: call.nonce,
        payload: call.result.clone(),
        signature: call.signature.clone(),
    };
    assert!(AttestationSigner::verify(&public_key, &signed));

    let stored = store.get_by_id(id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::Completed);
}

#[tokio::test]
async fn replaying_the_same_service_request_event_is_a_no_op() {
    let (signer, _public_key) = signer().await;
    let store = Arc::new(InMemoryStore::new());
    let dispatcher = Dispatcher::new(store.clone(), signer, DispatcherConfig::default());
    dispatcher.register(Arc::new(EchoService) as Arc<dyn DynService>);

    let rpc = Arc::new(RecordingRpc::new());
    let bridge = Arc::new(GatewayBridge::new(
        rpc.clone(),
        store.clone(),
        dispatcher.clone() as Arc<dyn DispatchSink>,
    ));
    dispatcher.set_gateway(bridge.clone());

    tokio::spawn(dispatcher.clone().run());

    let id = RequestId::new();
    let evt = event(id, b"seed".to_vec());
    bridge.handle_event(evt.clone()).await.unwrap();
    bridge.handle_event(evt).await.unwrap();

    for _ in 0..200 {
        if !rpc.fulfilled.lock().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Give a second pass a chance to (wrongly) double-fulfill if dedup failed.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(rpc.fulfilled.lock().await.len(), 1);
}

#[tokio::test]
async fn a_replayed_nonce_on_callback_terminates_the_request_as_failed_replay() {
    let (signer, _public_key) = signer().await;
    let store = Arc::new(InMemoryStore::new());
    let rpc = Arc::new(RecordingRpc::new());

    struct NullDispatch;
    #[async_trait]
    impl DispatchSink for NullDispatch {
        async fn enqueue(&self, _id: RequestId) -> Result<(), ServiceError> {
            Ok(())
        }

        fn is_registered(&self, _service_type: &str) -> bool {
            true
        }

        fn has_capacity(&self) -> bool {
            true
        }
    }

    let bridge = GatewayBridge::with_config(
        rpc,
        store.clone(),
        Arc::new(NullDispatch),
        ReconciliationConfig::default(),
    );

    let first_id = RequestId::new();
    let second_id = RequestId::new();
    bridge.handle_event(event(first_id, b"seed-a".to_vec())).await.unwrap();
    bridge.handle_event(event(second_id, b"seed-b".to_vec())).await.unwrap();
    store.claim(first_id).await.unwrap();
    store.claim(second_id).await.unwrap();

    // Both callbacks carry the same nonce, as if an attacker (or a buggy
    // caller) replayed an already-consumed nonce slot onto a second,
    // still-processing request.
    let shared_nonce = bridge.next_nonce();

    let first = signer_fulfillment(&signer, first_id, b"result-a".to_vec(), shared_nonce).await;
    bridge.deliver(first).await.unwrap();

    let stored_first = store.get_by_id(first_id).await.unwrap();
    assert_eq!(stored_first.status, RequestStatus::Completed);

    let second = signer_fulfillment(&signer, second_id, b"result-b".to_vec(), shared_nonce).await;
    bridge.deliver(second).await.unwrap();

    let stored_second = store.get_by_id(second_id).await.unwrap();
    assert_eq!(stored_second.status, RequestStatus::Failed);
    assert_eq!(stored_second.error.as_deref(), Some("replay"));
}

async fn signer_fulfillment(
    signer: &AttestationSigner,
    request_id: RequestId,
    payload: Vec<u8>,
    nonce: svc_core::Nonce,
) -> Fulfillment {
    let signed = signer.sign(request_id, payload.clone(), nonce).await.unwrap();
    Fulfillment {
        request_id,
        nonce,
        outcome: FulfillmentOutcome::Completed(payload),
        signature: signed.signature,
    }
}
