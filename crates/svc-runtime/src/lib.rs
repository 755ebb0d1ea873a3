//! The sandboxed service runtime (spec.md §4.3): the lifecycle frame that
//! wraps a business service, owns its enclave and store components in a
//! fixed start/stop order, and exposes a uniform `handle` entrypoint.

pub mod hooks;
pub mod runtime;
pub mod service;
pub mod state;

pub use hooks::{HookFn, Hooks};
pub use runtime::ServiceRuntime;
pub use service::BusinessService;
pub use state::RuntimeState;
