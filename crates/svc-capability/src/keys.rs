//! The Keys capability surface (spec.md §3 `KeyHandle`, §4.2).
//!
//! Keys are derived deterministically from a service-rooted seed using
//! HKDF-SHA256 (same combination `elisplash-paw` uses for its wallet/skill
//! key hierarchy): the same `path` always yields the same [`svc_core::KeyHandle`]
//! and the same signing key, but the raw key bytes never leave this module
//! — callers only ever see the opaque handle, the exported public key, or
//! a signature.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use svc_core::{Capability, KeyHandle, Manifest, ServiceError};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

pub struct Keys {
    manifest: Arc<Manifest>,
    root_seed: Zeroizing<[u8; 32]>,
    cache: RwLock<HashMap<KeyHandle, SigningKey>>,
}

impl Keys {
    pub fn new(manifest: Arc<Manifest>, root_seed: [u8; 32]) -> Self {
        Self {
            manifest,
            root_seed: Zeroizing::new(root_seed),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.manifest.grants(Capability::Keys) {
            Ok(())
        } else {
            Err(ServiceError::capability_denied("Keys"))
        }
    }

    fn expand(&self, info: &str, out: &mut [u8]) {
        let hk = Hkdf::<Sha256>::new(None, self.root_seed.as_ref());
        hk.expand(info.as_bytes(), out)
            .expect("HKDF output length is within SHA-256's 255*32 byte limit");
    }

    fn handle_for(&self, path: &str) -> KeyHandle {
        let mut bytes = [0u8; 16];
        self.expand(&format!("handle:{path}"), &mut bytes);
        KeyHandle(bytes.to_vec())
    }

    fn signing_key_for(&self, path: &str) -> SigningKey {
        let mut seed = [0u8; 32];
        self.expand(&format!("sign:{path}"), &mut seed);
        SigningKey::from_bytes(&seed)
    }

    /// Deterministic: the same `path` always yields the same handle.
    pub async fn derive_key(&self, path: &str) -> Result<KeyHandle, ServiceError> {
        self.check()?;
        let handle = self.handle_for(path);
        let mut cache = self.cache.write().await;
        cache
            .entry(handle.clone())
            .or_insert_with(|| self.signing_key_for(path));
        Ok(handle)
    }

    pub async fn public_key(&self, handle: &KeyHandle) -> Result<Vec<u8>, ServiceError> {
        self.check()?;
        let cache = self.cache.read().await;
        let key = cache
            .get(handle)
            .ok_or_else(|| ServiceError::NotFound(format!("key handle {handle}")))?;
        Ok(key.verifying_key().to_bytes().to_vec())
    }

    pub async fn sign(&self, handle: &KeyHandle, data: &[u8]) -> Result<Vec<u8>, ServiceError> {
        self.check()?;
        let cache = self.cache.read().await;
        let key = cache
            .get(handle)
            .ok_or_else(|| ServiceError::NotFound(format!("key handle {handle}")))?;
        Ok(key.sign(data).to_bytes().to_vec())
    }

    /// Derives a chain-scoped address from the handle's public key. This
    /// is a deterministic placeholder addressing scheme (not a specific
    /// chain's exact derivation), sufficient for the core's own contract
    /// since individual chain formats are a plug-in concern.
    pub async fn address(&self, handle: &KeyHandle, chain: &str) -> Result<String, ServiceError> {
        let pubkey = self.public_key(handle).await?;
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(chain.as_bytes());
        hasher.update(&pubkey);
        let digest = hasher.finalize();
        Ok(format!("{chain}:{}", hex(&digest[..20])))
    }

    pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(public_key.try_into().unwrap_or(&[0u8; 32])) else {
            return false;
        };
        let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        vk.verify_strict(data, &sig).is_ok()
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}
