//! The Secrets capability surface (spec.md §3, §4.2).
//!
//! Plaintext is only ever reachable from inside the closure passed to
//! [`Secrets::use_secret`]/[`Secrets::use_multiple`]; the buffer is zeroed
//! the instant the closure returns, and nothing with a `Debug`/`Display`
//! impl ever holds it. This is the invariant SPEC_FULL.md's first
//! REDESIGN FLAG hardens: no code path — including the audit logger — may
//! leak plaintext.

use std::collections::HashMap;
use std::sync::Arc;
use svc_core::{Capability, Manifest, ServiceError};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// A secret row as persisted (spec.md §3, `Secret`). Ciphertext only —
/// decryption happens inside [`Secrets::use_secret`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SecretRecord {
    pub name: String,
    pub ciphertext: Vec<u8>,
    pub version: u32,
    pub allowed_callers: Vec<String>,
}

/// Decrypts a stored ciphertext for one secret. Implementations live
/// outside this crate (sealed-store specific); this crate only enforces
/// the scope discipline.
pub trait SecretCipher: Send + Sync {
    fn decrypt(&self, record: &SecretRecord) -> Result<Vec<u8>, ServiceError>;
}

/// An in-memory cipher used by tests and the reference deployment: secrets
/// are stored "ciphertext" as plaintext bytes directly (a real deployment
/// plugs in an enclave-sealed cipher instead — the contract this crate
/// enforces does not depend on which).
pub struct IdentityCipher;

impl SecretCipher for IdentityCipher {
    fn decrypt(&self, record: &SecretRecord) -> Result<Vec<u8>, ServiceError> {
        Ok(record.ciphertext.clone())
    }
}

pub struct Secrets {
    manifest: Arc<Manifest>,
    cipher: Arc<dyn SecretCipher>,
    records: Arc<RwLock<HashMap<String, SecretRecord>>>,
}

impl Secrets {
    pub fn new(manifest: Arc<Manifest>, cipher: Arc<dyn SecretCipher>) -> Self {
        Self {
            manifest,
            cipher,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn put(&self, record: SecretRecord) {
        self.records.write().await.insert(record.name.clone(), record);
    }

    fn check_capability(&self) -> Result<(), ServiceError> {
        if self.manifest.grants(Capability::Secrets) {
            Ok(())
        } else {
            Err(ServiceError::capability_denied("Secrets"))
        }
    }

    /// Invokes `f(plaintext)`, zeroing the decrypted buffer before
    /// returning. The plaintext never escapes this call.
    pub async fn use_secret<R>(
        &self,
        name: &str,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, ServiceError> {
        self.check_capability()?;
        let record = self
            .records
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("secret '{name}'")))?;
        let plaintext = Zeroizing::new(self.cipher.decrypt(&record)?);
        Ok(f(&plaintext))
    }

    /// Same contract as [`Secrets::use_secret`] for a set of names; every
    /// buffer is zeroed before the call returns.
    pub async fn use_multiple<R>(
        &self,
        names: &[&str],
        f: impl FnOnce(&HashMap<String, Zeroizing<Vec<u8>>>) -> R,
    ) -> Result<R, ServiceError> {
        self.check_capability()?;
        let mut plaintexts = HashMap::new();
        for name in names {
            let record = self
                .records
                .read()
                .await
                .get(*name)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(format!("secret '{name}'")))?;
            let plaintext = Zeroizing::new(self.cipher.decrypt(&record)?);
            plaintexts.insert((*name).to_string(), plaintext);
        }
        Ok(f(&plaintexts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svc_core::ResourceLimits;

    fn manifest(caps: Vec<Capability>) -> Arc<Manifest> {
        Arc::new(Manifest {
            service_id: "test".into(),
            required_capabilities: caps,
            requested_capabilities: vec![],
            resource_limits: ResourceLimits::default(),
            sealed_config_key: "test/config".into(),
        })
    }

    #[tokio::test]
    async fn plaintext_is_visible_only_inside_the_closure() {
        let secrets = Secrets::new(manifest(vec![Capability::Secrets]), Arc::new(IdentityCipher));
        secrets
            .put(SecretRecord {
                name: "api-key".into(),
                ciphertext: b"topsecret".to_vec(),
                version: 1,
                allowed_callers: vec![],
            })
            .await;
        let len = secrets
            .use_secret("api-key", |plaintext| {
                assert_eq!(plaintext, b"topsecret");
                plaintext.len()
            })
            .await
            .unwrap();
        assert_eq!(len, 9);
    }

    #[tokio::test]
    async fn denied_without_capability_and_no_side_effects() {
        let secrets = Secrets::new(manifest(vec![]), Arc::new(IdentityCipher));
        secrets
            .put(SecretRecord {
                name: "api-key".into(),
                ciphertext: b"topsecret".to_vec(),
                version: 1,
                allowed_callers: vec![],
            })
            .await;
        let err = secrets.use_secret("api-key", |_| ()).await.unwrap_err();
        assert_eq!(err.kind(), svc_core::ErrorKind::CapabilityDenied);
    }
}
