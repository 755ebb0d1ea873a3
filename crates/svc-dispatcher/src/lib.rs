//! Request Dispatcher (spec.md §4.8): the component that turns a claimed
//! [`svc_core::Request`] into a signed, delivered terminal outcome —
//! service-type routing, a bounded worker pool, deadline enforcement,
//! transient-failure retry, and panic recovery.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use registry::{DynService, ServiceRegistry};
