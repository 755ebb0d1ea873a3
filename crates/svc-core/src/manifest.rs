//! Manifests and the service registry (spec.md §3, §5).
//!
//! The registry is the one piece of process-wide mutable state the core
//! keeps outside the store: a read-heavy map from `service_type` to its
//! registration, swapped atomically on write and never locked on read —
//! the "Registry, read-heavy, snapshot-on-write" policy spec.md §5 calls
//! for, using `arc-swap`.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// A named permission a service manifest may grant (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Secrets,
    Keys,
    Network,
    Compute,
    Storage,
    Attestation,
    Contract,
}

impl Capability {
    pub fn tag(self) -> &'static str {
        match self {
            Capability::Secrets => "Secrets",
            Capability::Keys => "Keys",
            Capability::Network => "Network",
            Capability::Compute => "Compute",
            Capability::Storage => "Storage",
            Capability::Attestation => "Attestation",
            Capability::Contract => "Contract",
        }
    }
}

/// Resource limits a service is constrained to while running inside the
/// sandbox (spec.md §3, `Manifest.resource_limits`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    pub max_compute_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_compute_ms: 5_000,
            max_payload_bytes: 1 << 20,
        }
    }
}

/// Per-service, startup-immutable declaration of identity, required
/// capabilities, and resource limits (spec.md §3, §4.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Manifest {
    pub service_id: String,
    pub required_capabilities: Vec<Capability>,
    pub requested_capabilities: Vec<Capability>,
    pub resource_limits: ResourceLimits,
    pub sealed_config_key: String,
}

impl Manifest {
    /// A capability is granted iff it appears in either the required or
    /// the requested set.
    pub fn grants(&self, cap: Capability) -> bool {
        self.required_capabilities.contains(&cap) || self.requested_capabilities.contains(&cap)
    }
}

/// Health of a registered service endpoint, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

/// A `service_type -> endpoint` mapping entry (spec.md §3,
/// `ServiceRegistration`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServiceRegistration {
    pub service_type: String,
    pub endpoint: String,
    pub tee_public_key: Vec<u8>,
    pub capability_set: Vec<Capability>,
    pub health: Health,
}

/// Read-mostly registry of `service_type -> ServiceRegistration`, swapped
/// atomically on write (spec.md §3 invariant: keys unique; dispatch fails
/// `ServiceUnavailable`/`NotFound` on a missing entry).
#[derive(Default)]
pub struct Registry {
    inner: ArcSwap<HashMap<String, ServiceRegistration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Looks up a registration without taking any lock.
    pub fn get(&self, service_type: &str) -> Option<ServiceRegistration> {
        self.inner.load().get(service_type).cloned()
    }

    /// Inserts or replaces a registration by copy-on-write snapshot swap.
    pub fn upsert(&self, registration: ServiceRegistration) {
        self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(registration.service_type.clone(), registration.clone());
            next
        });
    }

    pub fn remove(&self, service_type: &str) {
        self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(service_type);
            next
        });
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(service_type: &str) -> ServiceRegistration {
        ServiceRegistration {
            service_type: service_type.to_string(),
            endpoint: "inline".to_string(),
            tee_public_key: vec![],
            capability_set: vec![Capability::Network],
            health: Health::Healthy,
        }
    }

    #[test]
    fn missing_entry_resolves_to_none() {
        let registry = Registry::new();
        assert!(registry.get("oracle").is_none());
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let registry = Registry::new();
        registry.upsert(reg("oracle"));
        assert!(registry.get("oracle").is_some());
        assert_eq!(registry.len(), 1);
        registry.remove("oracle");
        assert!(registry.get("oracle").is_none());
    }

    #[test]
    fn manifest_grants_required_or_requested() {
        let manifest = Manifest {
            service_id: "oracle".into(),
            required_capabilities: vec![Capability::Network],
            requested_capabilities: vec![Capability::Attestation],
            resource_limits: ResourceLimits::default(),
            sealed_config_key: "oracle/config".into(),
        };
        assert!(manifest.grants(Capability::Network));
        assert!(manifest.grants(Capability::Attestation));
        assert!(!manifest.grants(Capability::Secrets));
    }
}
