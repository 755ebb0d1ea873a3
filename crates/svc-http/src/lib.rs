//! HTTP Ingress (spec.md §4.7): an authenticated REST surface layered over
//! [`svc_core::DispatchSink`]/[`svc_core::InlineDispatcher`] and
//! [`svc_store::RequestStore`], built on `axum` + `tower-http`.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use std::time::Duration;
use tower_http::trace::TraceLayer;

pub use auth::TokenStore;
pub use error::ApiError;
pub use state::AppState;

/// Builds the full router: the routes in [`routes`] wrapped in a
/// request-tracing layer.
pub fn app(state: AppState) -> axum::Router {
    routes::router(state).layer(TraceLayer::new_for_http())
}

/// The global fallback deadline used when a request carries no
/// service-specific hint (spec.md §4.8: "request hint, else service
/// default, else this global default").
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
