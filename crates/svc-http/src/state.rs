//! Shared application state for the HTTP Ingress router (spec.md §4.7).

use crate::auth::TokenStore;
use std::sync::Arc;
use std::time::Duration;
use svc_core::{DispatchSink, InlineDispatcher, RuntimeComponent};
use svc_store::RequestStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RequestStore>,
    pub dispatch: Arc<dyn DispatchSink>,
    pub inline: Arc<dyn InlineDispatcher>,
    pub tokens: Arc<TokenStore>,
    pub health: Arc<dyn RuntimeComponent>,
    pub default_deadline: Duration,
}
