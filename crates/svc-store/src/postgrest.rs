//! PostgREST-backed store (spec.md §4.4 "Postgres REST for production").
//!
//! Single-row operations map to PostgREST's standard `?column=eq.value`
//! filter conventions with `Prefer: return=representation` so we get the
//! updated row back without a second round trip; [`PostgrestStore::claim`]
//! relies on PostgREST translating a filtered `PATCH` into one atomic
//! `UPDATE ... WHERE status = 'pending' RETURNING *` so a losing claimer's
//! `PATCH` simply touches zero rows. The gateway-callback transaction
//! (nonce check + insert + terminal status write) cannot be expressed as a
//! single filtered `PATCH` across two tables, so it is exposed as a
//! Postgres function and called through PostgREST's `/rpc/` endpoint —
//! the idiomatic way to get cross-table atomicity out of PostgREST without
//! hand-rolling two-phase commit at the client.
//!
//! Every call goes out through a [`ResilientOutboundClient`] rather than a
//! bare `reqwest::Client` (spec.md §4.1: "every outbound call that may
//! fail transiently passes through this component") — a dropped
//! connection to Postgres/PostgREST gets the same retry/circuit-breaker
//! treatment as a call to the gateway RPC endpoint in
//! `svc-gateway::rpc::HttpGatewayRpc`.

use crate::traits::{GatewayOutcome, RequestFilter, RequestStore};
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use svc_core::{AccountId, HealthStatus, Nonce, Origin, Request, RequestId, RequestStatus, RuntimeComponent, ServiceError};
use svc_resilience::{OutboundRequest, OutboundResponse, ResilientOutboundClient};

pub struct PostgrestStore {
    client: Arc<ResilientOutboundClient>,
    base_url: String,
    call_timeout: Duration,
}

impl PostgrestStore {
    pub fn new(client: Arc<ResilientOutboundClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            call_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn deadline(&self) -> tokio::time::Instant {
        tokio::time::Instant::now() + self.call_timeout
    }

    /// Builds `{base_url}/{path}?k=v&...` with proper percent-encoding of
    /// query values (account ids, service type tags, etc. may contain
    /// characters PostgREST's filter syntax requires escaped).
    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<String, ServiceError> {
        let mut url = url::Url::parse(&format!("{}/{}", self.base_url.trim_end_matches('/'), path))
            .map_err(|e| ServiceError::Internal(format!("invalid postgrest url: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url.to_string())
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<OutboundResponse, ServiceError> {
        let request = OutboundRequest::get(self.url(path, query)?, self.deadline());
        self.client.do_request(request).await
    }

    async fn post(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<OutboundResponse, ServiceError> {
        let mut request = OutboundRequest::get(self.url(path, &[])?, self.deadline());
        request.method = reqwest::Method::POST;
        request.headers.insert("content-type".into(), "application/json".into());
        for (k, v) in headers {
            request.headers.insert((*k).into(), (*v).into());
        }
        request.body = serde_json::to_vec(body).map_err(|e| ServiceError::Internal(format!("encode body: {e}")))?;
        self.client.do_request(request).await
    }

    async fn patch(
        &self,
        path: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<OutboundResponse, ServiceError> {
        let mut request = OutboundRequest::get(self.url(path, query)?, self.deadline());
        request.method = reqwest::Method::PATCH;
        request.headers.insert("content-type".into(), "application/json".into());
        for (k, v) in headers {
            request.headers.insert((*k).into(), (*v).into());
        }
        request.body = serde_json::to_vec(body).map_err(|e| ServiceError::Internal(format!("encode body: {e}")))?;
        self.client.do_request(request).await
    }

    /// `do_request` already turns a non-2xx/retryable status into a
    /// `Transient` error for the generic 429/5xx set; PostgREST's own
    /// 4xx application errors (malformed filter, schema mismatch) pass
    /// through as-is and are surfaced here as `Internal`.
    fn check_status(response: &OutboundResponse) -> Result<(), ServiceError> {
        if (200..300).contains(&response.status) {
            Ok(())
        } else {
            let body = String::from_utf8_lossy(&response.body).into_owned();
            Err(ServiceError::Internal(format!("postgrest {}: {body}", response.status)))
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct RequestRow {
    id: String,
    origin: String,
    service_type: String,
    account_id: String,
    caller: String,
    user_contract: Option<String>,
    callback_method: Option<String>,
    payload: String,
    status: String,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn decode(value: &str) -> Result<Vec<u8>, ServiceError> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| ServiceError::Internal(format!("decode base64 payload: {e}")))
}

fn parse_status(s: &str) -> Result<RequestStatus, ServiceError> {
    match s {
        "pending" => Ok(RequestStatus::Pending),
        "processing" => Ok(RequestStatus::Processing),
        "completed" => Ok(RequestStatus::Completed),
        "failed" => Ok(RequestStatus::Failed),
        other => Err(ServiceError::Internal(format!("unknown status column value '{other}'"))),
    }
}

fn row_to_request(row: RequestRow) -> Result<Request, ServiceError> {
    use std::str::FromStr;
    use std::time::{Duration, UNIX_EPOCH};

    let parse_rfc3339_secs = |s: &str| -> Result<std::time::SystemTime, ServiceError> {
        let secs: i64 = s
            .parse()
            .map_err(|_| ServiceError::Internal(format!("unparseable timestamp '{s}'")))?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64))
    };

    Ok(Request {
        id: RequestId::from_str(&row.id).map_err(|e| ServiceError::Internal(e.to_string()))?,
        origin: if row.origin == "on_chain" { Origin::OnChain } else { Origin::Http },
        service_type: row.service_type,
        account_id: AccountId::from(row.account_id),
        caller: row.caller,
        user_contract: row.user_contract,
        callback_method: row.callback_method,
        payload: decode(&row.payload)?,
        created_at: parse_rfc3339_secs(&row.created_at)?,
        status: parse_status(&row.status)?,
        result: row.result.as_deref().map(decode).transpose()?,
        error: row.error,
        completed_at: row.completed_at.as_deref().map(parse_rfc3339_secs).transpose()?,
    })
}

fn parse_rows(response: &OutboundResponse) -> Result<Vec<RequestRow>, ServiceError> {
    serde_json::from_slice(&response.body).map_err(|e| ServiceError::Internal(format!("decode postgrest rows: {e}")))
}

#[async_trait::async_trait]
impl RequestStore for PostgrestStore {
    async fn create(&self, request: Request) -> Result<(), ServiceError> {
        let created_secs = request
            .created_at
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let row = serde_json::json!({
            "id": request.id.to_string(),
            "origin": if request.origin == Origin::OnChain { "on_chain" } else { "http" },
            "service_type": request.service_type,
            "account_id": request.account_id.0,
            "caller": request.caller,
            "user_contract": request.user_contract,
            "callback_method": request.callback_method,
            "payload": encode(&request.payload),
            "status": request.status.as_str(),
            "created_at": created_secs,
        });
        let response = self
            .post("requests", &[("Prefer", "return=minimal,resolution=ignore-duplicates")], &row)
            .await?;
        Self::check_status(&response)
    }

    async fn get_by_id(&self, id: RequestId) -> Result<Request, ServiceError> {
        let response = self.get("requests", &[("id", format!("eq.{id}"))]).await?;
        Self::check_status(&response)?;
        let row = parse_rows(&response)?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::NotFound(format!("request {id}")))?;
        row_to_request(row)
    }

    async fn claim(&self, id: RequestId) -> Result<Request, ServiceError> {
        let response = self
            .patch(
                "requests",
                &[("id", format!("eq.{id}")), ("status", "eq.pending".to_string())],
                &[("Prefer", "return=representation")],
                &serde_json::json!({ "status": "processing" }),
            )
            .await?;
        Self::check_status(&response)?;
        let row = parse_rows(&response)?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::AlreadyClaimed(id.to_string()))?;
        row_to_request(row)
    }

    async fn update_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        result: Option<Vec<u8>>,
        error: Option<String>,
    ) -> Result<(), ServiceError> {
        let body = serde_json::json!({
            "status": status.as_str(),
            "result": result.as_deref().map(encode),
            "error": error,
        });
        let response = self
            .patch("requests", &[("id", format!("eq.{id}"))], &[("Prefer", "return=minimal")], &body)
            .await?;
        Self::check_status(&response)
    }

    async fn count(&self) -> Result<u64, ServiceError> {
        let response = self.get("requests", &[("select", "id".to_string())]).await?;
        Self::check_status(&response)?;
        let content_range = response
            .headers
            .get("content-range")
            .map(String::as_str)
            .unwrap_or("");
        let total = content_range.rsplit('/').next().unwrap_or("0");
        total.parse().map_err(|_| ServiceError::Internal("missing Content-Range total".into()))
    }

    async fn list(&self, filter: RequestFilter, limit: usize, offset: usize) -> Result<Vec<Request>, ServiceError> {
        let mut query = vec![
            ("order".to_string(), "created_at.asc".to_string()),
            ("limit".to_string(), limit.to_string()),
            ("offset".to_string(), offset.to_string()),
        ];
        if let Some(status) = filter.status {
            query.push(("status".to_string(), format!("eq.{}", status.as_str())));
        }
        if let Some(service_type) = filter.service_type {
            query.push(("service_type".to_string(), format!("eq.{service_type}")));
        }
        if let Some(account_id) = filter.account_id {
            query.push(("account_id".to_string(), format!("eq.{}", account_id.0)));
        }
        let query_refs: Vec<(&str, String)> = query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let response = self.get("requests", &query_refs).await?;
        Self::check_status(&response)?;
        parse_rows(&response)?.into_iter().map(row_to_request).collect()
    }

    async fn mark_nonce_observed(&self, nonce: Nonce) -> Result<(), ServiceError> {
        let response = self
            .post(
                "nonces",
                &[("Prefer", "return=minimal")],
                &serde_json::json!({ "nonce": nonce.0 }),
            )
            .await?;
        if response.status == 409 {
            return Err(ServiceError::DuplicateNonce(nonce.0));
        }
        Self::check_status(&response)
    }

    async fn finalize_gateway_callback(
        &self,
        id: RequestId,
        nonce: Nonce,
        outcome: GatewayOutcome,
    ) -> Result<(), ServiceError> {
        let (status, result, error) = match outcome {
            GatewayOutcome::Completed(bytes) => ("completed", Some(encode(&bytes)), None),
            GatewayOutcome::Failed(reason) => ("failed", None, Some(reason)),
        };
        let response = self
            .post(
                "rpc/finalize_gateway_callback",
                &[],
                &serde_json::json!({
                    "p_request_id": id.to_string(),
                    "p_nonce": nonce.0,
                    "p_status": status,
                    "p_result": result,
                    "p_error": error,
                }),
            )
            .await?;
        if response.status == 409 {
            return Err(ServiceError::DuplicateNonce(nonce.0));
        }
        Self::check_status(&response)
    }
}

#[async_trait::async_trait]
impl RuntimeComponent for PostgrestStore {
    async fn start(&self) -> Result<(), ServiceError> {
        let response = self.get("requests", &[("limit", "1".to_string())]).await?;
        Self::check_status(&response)
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        match self.get("requests", &[("limit", "1".to_string())]).await {
            Ok(response) if (200..300).contains(&response.status) => HealthStatus::Healthy,
            Ok(_) => HealthStatus::Degraded,
            Err(_) => HealthStatus::Unhealthy,
        }
    }
}
