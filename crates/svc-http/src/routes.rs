//! The REST surface itself (spec.md §4.7, §6 — bit-exact response
//! shapes).

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use svc_core::{AccountId, Origin, Request, RequestId, ServiceError};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/requests", post(create_request))
        .route("/requests/{id}", get(get_request))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/{service_type}/{operation}", post(call_service))
        .with_state(state)
}

#[derive(Debug, serde::Deserialize)]
struct CreateRequestBody {
    service_type: String,
    payload: String,
    callback_method: Option<String>,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// `POST /requests` (spec.md §6).
async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = state.tokens.authenticate(bearer(&headers))?;

    let payload = base64::engine::general_purpose::STANDARD
        .decode(&body.payload)
        .map_err(|e| ServiceError::BadRequest(format!("payload is not valid base64: {e}")))?;

    if body.service_type.trim().is_empty() {
        return Err(ServiceError::BadRequest("service_type must not be empty".into()).into());
    }

    // Reject synchronously rather than queue a request nothing can ever
    // route or admit (spec.md §6: "503 service unavailable" is one of
    // exactly three possible responses here).
    if !state.dispatch.is_registered(&body.service_type) {
        return Err(ServiceError::ServiceUnavailable(format!(
            "service_type '{}' is not registered",
            body.service_type
        ))
        .into());
    }
    if !state.dispatch.has_capacity() {
        return Err(ServiceError::ServiceUnavailable("dispatch queue is full".into()).into());
    }

    let mut request = Request::new(Origin::Http, body.service_type, account_id, "http", payload);
    request.callback_method = body.callback_method;
    let id = request.id;

    state.store.create(request).await?;
    state.dispatch.enqueue(id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "request_id": id.to_string(), "status": "pending" })),
    ))
}

/// `GET /requests/{id}` (spec.md §6). Returns 404 both for an unknown id
/// and for an id owned by a different account — the response shape must
/// not let a caller distinguish "not yours" from "does not exist".
async fn get_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = state.tokens.authenticate(bearer(&headers))?;
    let id = RequestId::from_str(&id).map_err(|_| ServiceError::NotFound(format!("request {id}")))?;

    let request = state.store.get_by_id(id).await?;
    if request.account_id != account_id {
        return Err(ServiceError::NotFound(format!("request {id}")).into());
    }

    let mut body = serde_json::json!({
        "request_id": request.id.to_string(),
        "status": request.status.as_str(),
        "created_at": unix_secs(request.created_at),
    });
    if let Some(result) = &request.result {
        body["result"] = serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(result));
    }
    if let Some(error) = &request.error {
        body["error"] = serde_json::Value::String(error.clone());
    }
    if let Some(completed_at) = request.completed_at {
        body["completed_at"] = serde_json::Value::Number(unix_secs(completed_at).into());
    }

    Ok((StatusCode::OK, Json(body)))
}

/// Service-specific synchronous routes, e.g. `POST /oracle/fetch`
/// (spec.md §4.7, §6).
async fn call_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((service_type, _operation)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = state.tokens.authenticate(bearer(&headers))?;
    let request = Request::new(Origin::Http, service_type, account_id, "http-inline", body.to_vec());
    let (result, signature) = state.inline.dispatch_inline(request, state.default_deadline).await?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "result": base64::engine::general_purpose::STANDARD.encode(result),
            "signature": base64::engine::general_purpose::STANDARD.encode(signature),
        })),
    ))
}

/// `GET /health` (spec.md §6: "200 when Running and all components
/// healthy; 503 otherwise").
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.health().await;
    let code = if status.is_healthy() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        code,
        Json(serde_json::json!({ "status": format!("{status:?}").to_lowercase() })),
    )
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.store.count().await.unwrap_or(0);
    let health = state.health.health().await;
    Json(serde_json::json!({
        "requests_total": count,
        "health": format!("{health:?}").to_lowercase(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use svc_core::DispatchSink;
    use svc_store::memory::InMemoryStore;
    use tower::ServiceExt;

    struct NoopDispatch;

    #[async_trait]
    impl DispatchSink for NoopDispatch {
        async fn enqueue(&self, _id: RequestId) -> Result<(), ServiceError> {
            Ok(())
        }

        fn is_registered(&self, _service_type: &str) -> bool {
            true
        }

        fn has_capacity(&self) -> bool {
            true
        }
    }

    struct EchoInline;

    #[async_trait]
    impl svc_core::InlineDispatcher for EchoInline {
        async fn dispatch_inline(
            &self,
            request: Request,
            _deadline: Duration,
        ) -> Result<(Vec<u8>, Vec<u8>), ServiceError> {
            Ok((request.payload, vec![0xAB]))
        }
    }

    struct AlwaysHealthy;

    #[async_trait]
    impl svc_core::RuntimeComponent for AlwaysHealthy {
        async fn start(&self) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn health(&self) -> HealthStatus {
            HealthStatus::Healthy
        }
    }

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(InMemoryStore::new()),
            dispatch: Arc::new(NoopDispatch),
            inline: Arc::new(EchoInline),
            tokens: Arc::new(TokenStore::from_env_value("acct-1:secret-token")),
            health: Arc::new(AlwaysHealthy),
            default_deadline: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn create_then_fetch_round_trips_through_the_store() {
        let state = test_state();
        let app = router(state);

        let create = HttpRequest::post("/requests")
            .header("authorization", "Bearer secret-token")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "service_type": "oracle", "payload": base64::engine::general_purpose::STANDARD.encode(b"x") })
                    .to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let id = body["request_id"].as_str().unwrap();

        let get = HttpRequest::get(format!("/requests/{id}"))
            .header("authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "pending");
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let state = test_state();
        let app = router(state);
        let request = HttpRequest::get("/requests/00000000-0000-0000-0000-000000000000")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let state = test_state();
        let app = router(state);
        let request = HttpRequest::get("/requests/00000000-0000-0000-0000-000000000000")
            .header("authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn a_different_accounts_request_is_not_found_not_forbidden() {
        let state = test_state();
        // Seed a request owned by a different account directly through the store.
        let mut other = Request::new(Origin::Http, "oracle", AccountId::from("acct-2"), "http", vec![1]);
        other.callback_method = None;
        let id = other.id;
        state.store.create(other).await.unwrap();

        let app = router(state);
        let request = HttpRequest::get(format!("/requests/{id}"))
            .header("authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn service_specific_route_calls_inline_dispatch() {
        let state = test_state();
        let app = router(state);
        let request = HttpRequest::post("/oracle/fetch")
            .header("authorization", "Bearer secret-token")
            .body(Body::from("payload-bytes"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["result"].is_string());
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok_when_healthy() {
        let state = test_state();
        let app = router(state);
        let request = HttpRequest::get("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    struct UnregisteredDispatch;

    #[async_trait]
    impl DispatchSink for UnregisteredDispatch {
        async fn enqueue(&self, _id: RequestId) -> Result<(), ServiceError> {
            panic!("must not enqueue a request for an unregistered service_type");
        }

        fn is_registered(&self, _service_type: &str) -> bool {
            false
        }

        fn has_capacity(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn unregistered_service_type_is_rejected_synchronously_as_unavailable() {
        let mut state = test_state();
        state.dispatch = Arc::new(UnregisteredDispatch);
        let app = router(state);

        let request = HttpRequest::post("/requests")
            .header("authorization", "Bearer secret-token")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "service_type": "unknown", "payload": base64::engine::general_purpose::STANDARD.encode(b"x") })
                    .to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    struct FullQueueDispatch;

    #[async_trait]
    impl DispatchSink for FullQueueDispatch {
        async fn enqueue(&self, _id: RequestId) -> Result<(), ServiceError> {
            panic!("must not enqueue a request when the queue has no capacity");
        }

        fn is_registered(&self, _service_type: &str) -> bool {
            true
        }

        fn has_capacity(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn full_queue_is_rejected_synchronously_as_unavailable() {
        let mut state = test_state();
        state.dispatch = Arc::new(FullQueueDispatch);
        let app = router(state);

        let request = HttpRequest::post("/requests")
            .header("authorization", "Bearer secret-token")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "service_type": "oracle", "payload": base64::engine::general_purpose::STANDARD.encode(b"x") })
                    .to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
