//! The Attestation capability surface (spec.md §3 "Attestation quote", §4.2).
//!
//! A quote binds a 64-byte user-controlled value to this service's TEE
//! measurement, signed under the service's attestation key so the gateway
//! (or any verifier) can check it against the registered public key.

use crate::keys::Keys;
use std::sync::Arc;
use svc_core::{Capability, KeyHandle, Manifest, ServiceError};

pub const USER_DATA_LEN: usize = 64;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Quote {
    pub measurement: [u8; 32],
    pub user_data: [u8; USER_DATA_LEN],
    pub signature: Vec<u8>,
}

pub struct Attestation {
    manifest: Arc<Manifest>,
    measurement: [u8; 32],
    keys: Arc<Keys>,
    attestation_key: KeyHandle,
}

impl Attestation {
    pub fn new(
        manifest: Arc<Manifest>,
        measurement: [u8; 32],
        keys: Arc<Keys>,
        attestation_key: KeyHandle,
    ) -> Self {
        Self {
            manifest,
            measurement,
            keys,
            attestation_key,
        }
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.manifest.grants(Capability::Attestation) {
            Ok(())
        } else {
            Err(ServiceError::capability_denied("Attestation"))
        }
    }

    pub async fn generate_quote(&self, user_data: [u8; USER_DATA_LEN]) -> Result<Quote, ServiceError> {
        self.check()?;
        let mut message = Vec::with_capacity(32 + USER_DATA_LEN);
        message.extend_from_slice(&self.measurement);
        message.extend_from_slice(&user_data);
        let signature = self.keys.sign(&self.attestation_key, &message).await?;
        Ok(Quote {
            measurement: self.measurement,
            user_data,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svc_core::ResourceLimits;

    #[tokio::test]
    async fn quote_signature_verifies_under_service_public_key() {
        let manifest = Arc::new(Manifest {
            service_id: "oracle".into(),
            required_capabilities: vec![Capability::Attestation, Capability::Keys],
            requested_capabilities: vec![],
            resource_limits: ResourceLimits::default(),
            sealed_config_key: "oracle/config".into(),
        });
        let keys = Arc::new(Keys::new(manifest.clone(), [1u8; 32]));
        let handle = keys.derive_key("oracle/sign").await.unwrap();
        let pubkey = keys.public_key(&handle).await.unwrap();
        let attestation = Attestation::new(manifest, [0x42; 32], keys, handle);

        let quote = attestation.generate_quote([0x7; 64]).await.unwrap();
        let mut message = quote.measurement.to_vec();
        message.extend_from_slice(&quote.user_data);
        assert!(Keys::verify(&pubkey, &message, &quote.signature));
    }
}
