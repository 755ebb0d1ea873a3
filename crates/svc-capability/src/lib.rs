//! `CapabilityGatedOS` (spec.md §4.2): the seven capability surfaces a
//! sandboxed service is constructed against, plus the [`facade::CapabilityOs`]
//! that assembles them from a shared manifest.
//!
//! Every surface follows the same shape: a concrete struct holding
//! `Arc<svc_core::Manifest>`, a `check()` that maps a missing grant to
//! [`svc_core::ErrorKind::CapabilityDenied`], and operations that call
//! `check()` before doing anything observable.

pub mod attestation;
pub mod compute;
pub mod contract;
pub mod facade;
pub mod keys;
pub mod network;
pub mod secrets;
pub mod storage;

pub use attestation::{Attestation, Quote, USER_DATA_LEN};
pub use compute::{Compute, ComputeFn, ComputeRequest};
pub use contract::{CallbackResponse, Contract, ContractClient, ServiceRequestEvent, Subscription};
pub use facade::{CapabilityOs, CapabilityOsConfig};
pub use keys::Keys;
pub use network::{AuthType, Network};
pub use secrets::{IdentityCipher, SecretCipher, SecretRecord, Secrets};
pub use storage::Storage;
