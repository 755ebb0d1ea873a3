//! The Storage capability surface (spec.md §3 "Sealed config", §4.2).
//!
//! Values are kept encrypted at rest with AES-256-GCM under a service-
//! rooted key, matching `elisplash-paw`'s convention for its skill vault.
//! `Use` decrypts, hands the caller a `serde_json::Value`, and never
//! persists the plaintext back out.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use std::collections::HashMap;
use std::sync::Arc;
use svc_core::{Capability, Manifest, ServiceError};
use tokio::sync::RwLock;

struct Sealed {
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

pub struct Storage {
    manifest: Arc<Manifest>,
    cipher: Aes256Gcm,
    values: Arc<RwLock<HashMap<String, Sealed>>>,
}

impl Storage {
    pub fn new(manifest: Arc<Manifest>, sealing_key: [u8; 32]) -> Self {
        Self {
            manifest,
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&sealing_key)),
            values: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.manifest.grants(Capability::Storage) {
            Ok(())
        } else {
            Err(ServiceError::capability_denied("Storage"))
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, ServiceError> {
        self.check()?;
        Ok(self.values.read().await.contains_key(key))
    }

    /// Seals and stores a JSON value under `key`.
    pub async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), ServiceError> {
        self.check()?;
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| ServiceError::Internal(format!("serialize sealed value: {e}")))?;
        let mut nonce_bytes = [0u8; 12];
        rand::Rng::fill(&mut rand::rng(), &mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|_| ServiceError::Internal("seal storage value".into()))?;
        self.values.write().await.insert(
            key.to_string(),
            Sealed {
                nonce: nonce_bytes,
                ciphertext,
            },
        );
        Ok(())
    }

    /// Unseals the value stored under `key` and invokes `f` with it.
    pub async fn use_value<R>(
        &self,
        key: &str,
        f: impl FnOnce(&serde_json::Value) -> R,
    ) -> Result<R, ServiceError> {
        self.check()?;
        let values = self.values.read().await;
        let sealed = values
            .get(key)
            .ok_or_else(|| ServiceError::NotFound(format!("storage key '{key}'")))?;
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
            .map_err(|_| ServiceError::Internal("unseal storage value".into()))?;
        let value: serde_json::Value = serde_json::from_slice(&plaintext)
            .map_err(|e| ServiceError::Internal(format!("deserialize sealed value: {e}")))?;
        Ok(f(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svc_core::ResourceLimits;

    fn manifest(caps: Vec<Capability>) -> Arc<Manifest> {
        Arc::new(Manifest {
            service_id: "oracle".into(),
            required_capabilities: caps,
            requested_capabilities: vec![],
            resource_limits: ResourceLimits::default(),
            sealed_config_key: "oracle/config".into(),
        })
    }

    #[tokio::test]
    async fn round_trips_through_seal_and_unseal() {
        let storage = Storage::new(manifest(vec![Capability::Storage]), [3u8; 32]);
        storage
            .put("oracle/config", &serde_json::json!({ "allowlist": ["api.example.com"] }))
            .await
            .unwrap();
        assert!(storage.exists("oracle/config").await.unwrap());
        let hosts = storage
            .use_value("oracle/config", |v| v["allowlist"][0].as_str().unwrap().to_string())
            .await
            .unwrap();
        assert_eq!(hosts, "api.example.com");
    }

    #[tokio::test]
    async fn denied_without_storage_capability() {
        let storage = Storage::new(manifest(vec![]), [3u8; 32]);
        assert_eq!(
            storage.exists("k").await.unwrap_err().kind(),
            svc_core::ErrorKind::CapabilityDenied
        );
    }
}
