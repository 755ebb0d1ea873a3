//! TEE Attestation Signer (spec.md §4.5).
//!
//! Derives a service-scoped signing key at startup under
//! `"{service_id}/sign"` through the Keys capability, publishes its public
//! key, and signs `H(request_id || result_bytes || nonce)` for every
//! completed fulfillment. Single-keyed per service, multi-call safe
//! (the underlying `Keys` surface already serializes cache access), and
//! idempotent for identical inputs — hashing plus Ed25519 signing are both
//! pure functions of their input.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use svc_capability::Keys;
use svc_core::{KeyHandle, Nonce, RequestId, ServiceError};

/// A signed fulfillment ready to hand to the Gateway Bridge or HTTP
/// Ingress: the raw result/reason bytes plus the signature binding them to
/// `(request_id, nonce)`.
#[derive(Debug, Clone)]
pub struct SignedFulfillment {
    pub request_id: RequestId,
    pub nonce: Nonce,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Signs completed/failed requests under one service-scoped Ed25519 key.
pub struct AttestationSigner {
    service_id: String,
    keys: Arc<Keys>,
    key_handle: KeyHandle,
}

impl AttestationSigner {
    /// Derives `"{service_id}/sign"` through `keys` and publishes the
    /// resulting handle (spec.md §4.5: "derive a service-scoped signing
    /// key at startup").
    pub async fn new(service_id: impl Into<String>, keys: Arc<Keys>) -> Result<Self, ServiceError> {
        let service_id = service_id.into();
        let key_handle = keys.derive_key(&format!("{service_id}/sign")).await?;
        Ok(Self {
            service_id,
            keys,
            key_handle,
        })
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn key_handle(&self) -> &KeyHandle {
        &self.key_handle
    }

    /// The public key the gateway (or any verifier) checks signatures
    /// against.
    pub async fn public_key(&self) -> Result<Vec<u8>, ServiceError> {
        self.keys.public_key(&self.key_handle).await
    }

    /// `msg = H(request_id || result_bytes || nonce)` (spec.md §4.5, §6
    /// `Fulfill`). Shared by both sign and verify so the two never drift.
    pub fn message(request_id: RequestId, payload: &[u8], nonce: Nonce) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(request_id.as_bytes());
        hasher.update(payload);
        hasher.update(nonce.0.to_be_bytes());
        hasher.finalize().into()
    }

    /// Signs a completed or failed result under the derived key, producing
    /// the tuple the Gateway Bridge assembles into `Fulfill`/`Fail`.
    pub async fn sign(
        &self,
        request_id: RequestId,
        payload: Vec<u8>,
        nonce: Nonce,
    ) -> Result<SignedFulfillment, ServiceError> {
        let message = Self::message(request_id, &payload, nonce);
        let signature = self.keys.sign(&self.key_handle, &message).await?;
        tracing::debug!(
            request_id = %request_id,
            nonce = nonce.0,
            service_id = %self.service_id,
            "signed fulfillment"
        );
        Ok(SignedFulfillment {
            request_id,
            nonce,
            payload,
            signature,
        })
    }

    /// Verifies a fulfillment's signature against a published public key —
    /// used by tests and by any verifier that does not hold the enclave's
    /// key material directly (spec.md §8 property 6).
    pub fn verify(public_key: &[u8], fulfillment: &SignedFulfillment) -> bool {
        let message = Self::message(fulfillment.request_id, &fulfillment.payload, fulfillment.nonce);
        Keys::verify(public_key, &message, &fulfillment.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use svc_core::{Capability, Manifest, ResourceLimits};

    fn manifest() -> Arc<Manifest> {
        Arc::new(Manifest {
            service_id: "oracle".into(),
            required_capabilities: vec![Capability::Keys],
            requested_capabilities: vec![],
            resource_limits: ResourceLimits::default(),
            sealed_config_key: "oracle/config".into(),
        })
    }

    #[tokio::test]
    async fn signature_verifies_under_published_public_key() {
        let keys = Arc::new(Keys::new(manifest(), [5u8; 32]));
        let signer = AttestationSigner::new("oracle", keys).await.unwrap();
        let public_key = signer.public_key().await.unwrap();

        let request_id = RequestId::new();
        let fulfillment = signer
            .sign(request_id, b"42".to_vec(), Nonce(7))
            .await
            .unwrap();

        assert!(AttestationSigner::verify(&public_key, &fulfillment));
    }

    #[tokio::test]
    async fn signing_is_idempotent_for_identical_inputs() {
        let keys = Arc::new(Keys::new(manifest(), [5u8; 32]));
        let signer = AttestationSigner::new("oracle", keys).await.unwrap();
        let request_id = RequestId::new();

        let first = signer.sign(request_id, b"result".to_vec(), Nonce(1)).await.unwrap();
        let second = signer.sign(request_id, b"result".to_vec(), Nonce(1)).await.unwrap();
        assert_eq!(first.signature, second.signature);
    }

    #[tokio::test]
    async fn tampered_payload_fails_verification() {
        let keys = Arc::new(Keys::new(manifest(), [5u8; 32]));
        let signer = AttestationSigner::new("oracle", keys).await.unwrap();
        let public_key = signer.public_key().await.unwrap();

        let mut fulfillment = signer
            .sign(RequestId::new(), b"result".to_vec(), Nonce(1))
            .await
            .unwrap();
        fulfillment.payload = b"tampered".to_vec();
        assert!(!AttestationSigner::verify(&public_key, &fulfillment));
    }
}
