//! Process entry point (spec.md §6): wires the capability-gated sandbox,
//! the dispatcher, the (optional) Gateway Bridge, and the HTTP Ingress
//! around one registered business service, then serves until shutdown.
//!
//! Exit codes: 0 clean shutdown, 1 startup failure (capability/config), 2
//! runtime unrecoverable error.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use svc_capability::{CapabilityOs, CapabilityOsConfig, Keys};
use svc_core::{Capability, HealthStatus, Manifest, ResourceLimits, RuntimeComponent, ServiceError};
use svc_dispatcher::{Dispatcher, DispatcherConfig, DynService};
use svc_gateway::{GatewayBridge, HttpGatewayEventSource, HttpGatewayRpc};
use svc_http::{AppState, TokenStore};
use svc_oracle::OracleService;
use svc_resilience::ResilientOutboundClient;
use svc_runtime::{Hooks, ServiceRuntime};
use svc_signer::AttestationSigner;
use svc_store::{InMemoryStore, PostgrestStore, RequestStore};
use tokio::net::TcpListener;

/// Adapts [`ServiceRuntime::health`] (an inherent method, since
/// `ServiceRuntime<S>` is generic over the service type and so cannot
/// itself implement [`RuntimeComponent`] once boxed) to the trait object
/// the HTTP Ingress's `/health` route expects.
struct RuntimeHealth<S: svc_runtime::BusinessService + Send + Sync + 'static>(Arc<ServiceRuntime<S>>);

#[async_trait::async_trait]
impl<S: svc_runtime::BusinessService + Send + Sync + 'static> RuntimeComponent for RuntimeHealth<S> {
    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        self.0.health().await
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn required_env_var(name: &str) -> Result<String, ServiceError> {
    env_var(name).ok_or_else(|| ServiceError::Internal(format!("{name} is not set")))
}

fn host_allowlist() -> HashSet<String> {
    env_var("NETWORK_HOST_ALLOWLIST")
        .map(|value| value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::from(0),
        Err(StartupOrRuntimeError::Startup(err)) => {
            tracing::error!(error = %err, "startup failed");
            ExitCode::from(1)
        }
        Err(StartupOrRuntimeError::Runtime(err)) => {
            tracing::error!(error = %err, "unrecoverable runtime error");
            ExitCode::from(2)
        }
    }
}

enum StartupOrRuntimeError {
    Startup(ServiceError),
    Runtime(ServiceError),
}

impl From<ServiceError> for StartupOrRuntimeError {
    fn from(err: ServiceError) -> Self {
        StartupOrRuntimeError::Startup(err)
    }
}

async fn run() -> Result<(), StartupOrRuntimeError> {
    let service_id = required_env_var("SERVICE_ID")?;
    let port: u16 = env_var("PORT")
        .map(|v| v.parse().map_err(|_| ServiceError::Internal("PORT must be a u16".into())))
        .transpose()?
        .unwrap_or(8080);

    // TEE session key analogy: a fresh root seed every boot, never
    // persisted. Every key this process ever derives traces back to it.
    let root_seed: [u8; 32] = rand::random();

    let manifest = Arc::new(Manifest {
        service_id: service_id.clone(),
        required_capabilities: vec![Capability::Keys, Capability::Network],
        requested_capabilities: vec![],
        resource_limits: ResourceLimits::default(),
        sealed_config_key: format!("{service_id}/config"),
    });

    // The signer is built from its own `Keys` instance rather than reaching
    // into the `CapabilityOs` built below: both derive from the same
    // `root_seed`, and `Keys::derive_key`'s HKDF expansion depends only on
    // `root_seed` and the path string, so the two instances agree on every
    // key they ever derive for this service. This sidesteps a second
    // construction-order cycle (the signer needs a key before the
    // dispatcher exists; the dispatcher is needed by the gateway bridge
    // before the capability OS's network client is built).
    let keys = Arc::new(Keys::new(manifest.clone(), root_seed));
    let signer = Arc::new(AttestationSigner::new(&service_id, keys).await?);

    // A store-dedicated client: Postgres/PostgREST outages and upstream
    // network-capability outages are independent failure domains and must
    // not share a circuit breaker (spec.md §4.1: "per logical client
    // instance").
    let store_outbound = Arc::new(ResilientOutboundClient::new(format!("{service_id}-store")));
    let (store, store_component) = build_store(store_outbound);

    let dispatcher = Dispatcher::new(store.clone(), signer, DispatcherConfig::default());

    let outbound = Arc::new(ResilientOutboundClient::new(format!("{service_id}-net")));
    let capability_config = CapabilityOsConfig {
        host_allowlist: host_allowlist(),
        ..CapabilityOsConfig::new(manifest, root_seed)
    };
    let capability_os = Arc::new(CapabilityOs::new(capability_config, outbound.clone()).await?);

    let runtime = Arc::new(ServiceRuntime::new(OracleService, capability_os, store_component, Hooks::new()));
    runtime.start().await?;
    dispatcher.register(runtime.clone() as Arc<dyn DynService>);

    let gateway = match (env_var("GATEWAY_RPC_URL"), env_var("GATEWAY_CONTRACT_ADDRESS")) {
        (Some(rpc_url), Some(contract_address)) => {
            let rpc = Arc::new(HttpGatewayRpc::new(outbound.clone(), rpc_url.clone(), contract_address.clone()));
            let bridge = Arc::new(GatewayBridge::new(rpc, store.clone(), dispatcher.clone()));
            dispatcher.set_gateway(bridge.clone());

            let source = Arc::new(HttpGatewayEventSource::new(outbound, rpc_url, contract_address));
            tokio::spawn(bridge.clone().run_ingest_loop(source, Duration::from_secs(2)));
            tokio::spawn(bridge.clone().run_reconciliation_loop());
            Some(bridge)
        }
        _ => {
            tracing::info!("GATEWAY_RPC_URL/GATEWAY_CONTRACT_ADDRESS not set, running HTTP-only");
            None
        }
    };
    let _gateway = gateway;

    tokio::spawn(dispatcher.clone().run());

    let state = AppState {
        store,
        dispatch: dispatcher.clone(),
        inline: dispatcher,
        tokens: Arc::new(TokenStore::from_env_value(&env_var("API_TOKENS").unwrap_or_default())),
        health: Arc::new(RuntimeHealth(runtime.clone())),
        default_deadline: svc_http::DEFAULT_DEADLINE,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::Internal(format!("failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, service_id, "listening");

    let app = svc_http::app(state);
    let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        runtime.stop().await.ok();
        return Err(StartupOrRuntimeError::Runtime(ServiceError::Internal(format!(
            "server error: {err}"
        ))));
    }

    runtime
        .stop()
        .await
        .map_err(StartupOrRuntimeError::Runtime)?;
    Ok(())
}

/// Builds the request store chosen by `DATABASE_URL` and coerces the same
/// concrete instance into both seams the rest of the wiring needs: the
/// store proper, and the `RuntimeComponent` the service runtime starts and
/// health-checks alongside the capability OS.
fn build_store(outbound: Arc<ResilientOutboundClient>) -> (Arc<dyn RequestStore>, Arc<dyn RuntimeComponent>) {
    match env_var("DATABASE_URL") {
        Some(url) => {
            let store = Arc::new(PostgrestStore::new(outbound, url));
            (store.clone(), store)
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            let store = Arc::new(InMemoryStore::new());
            (store.clone(), store)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
