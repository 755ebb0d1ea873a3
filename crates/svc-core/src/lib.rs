//! Shared base types for the service layer: the `Request` aggregate, the
//! error taxonomy, service manifests/registry, and a generic event system.
//!
//! Every other `svc-*` crate depends on this one and nothing else in the
//! workspace.

pub mod component;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod ids;
pub mod manifest;
pub mod request;

pub use component::{aggregate_health, HealthStatus, RuntimeComponent};
pub use dispatch::{DeliverySink, DispatchSink, Fulfillment, FulfillmentOutcome, InlineDispatcher};
pub use error::{ErrorKind, ServiceError};
pub use events::{CoreEvent, EventListener, EventListeners};
pub use ids::{AccountId, KeyHandle, Nonce, RequestId};
pub use manifest::{Capability, Health, Manifest, Registry, ResourceLimits, ServiceRegistration};
pub use request::{Origin, Request, RequestStatus};
