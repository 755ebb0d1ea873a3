//! The Network capability surface (spec.md §4.2).
//!
//! Wraps a [`svc_resilience::ResilientOutboundClient`] with a host
//! allowlist check and, for [`Network::fetch_with_secret`], transparent
//! credential injection that never surfaces the secret to the caller.

use crate::secrets::Secrets;
use std::collections::HashSet;
use std::sync::Arc;
use svc_core::{Capability, Manifest, ServiceError};
use svc_resilience::{OutboundRequest, OutboundResponse, ResilientOutboundClient};

/// How a fetched secret should be attached to the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    None,
    Bearer,
    ApiKey,
    Basic,
}

pub struct Network {
    manifest: Arc<Manifest>,
    client: Arc<ResilientOutboundClient>,
    allowlist: HashSet<String>,
}

impl Network {
    pub fn new(
        manifest: Arc<Manifest>,
        client: Arc<ResilientOutboundClient>,
        allowlist: HashSet<String>,
    ) -> Self {
        Self {
            manifest,
            client,
            allowlist,
        }
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.manifest.grants(Capability::Network) {
            Ok(())
        } else {
            Err(ServiceError::capability_denied("Network"))
        }
    }

    fn check_host(&self, url: &str) -> Result<(), ServiceError> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .ok_or_else(|| ServiceError::BadRequest(format!("invalid url: {url}")))?;
        if self.allowlist.contains(&host) {
            Ok(())
        } else {
            Err(ServiceError::capability_denied("Network"))
        }
    }

    pub async fn fetch(&self, request: OutboundRequest) -> Result<OutboundResponse, ServiceError> {
        self.check()?;
        self.check_host(&request.url)?;
        self.client.do_request(request).await
    }

    /// Fetches with a secret injected as a header, per `auth_type`. The
    /// plaintext secret is held only for the duration of building the
    /// request and is dropped before this function returns.
    pub async fn fetch_with_secret(
        &self,
        mut request: OutboundRequest,
        secrets: &Secrets,
        secret_name: &str,
        auth_type: AuthType,
    ) -> Result<OutboundResponse, ServiceError> {
        self.check()?;
        self.check_host(&request.url)?;

        let header = secrets
            .use_secret(secret_name, |plaintext| {
                let value = String::from_utf8_lossy(plaintext).into_owned();
                match auth_type {
                    AuthType::None => None,
                    AuthType::Bearer => Some(("Authorization".to_string(), format!("Bearer {value}"))),
                    AuthType::ApiKey => Some(("X-Api-Key".to_string(), value)),
                    AuthType::Basic => Some(("Authorization".to_string(), format!("Basic {value}"))),
                }
            })
            .await?;

        if let Some((name, value)) = header {
            request.headers.insert(name, value);
        }
        self.client.do_request(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svc_core::ResourceLimits;

    fn manifest(caps: Vec<Capability>) -> Arc<Manifest> {
        Arc::new(Manifest {
            service_id: "oracle".into(),
            required_capabilities: caps,
            requested_capabilities: vec![],
            resource_limits: ResourceLimits::default(),
            sealed_config_key: "oracle/config".into(),
        })
    }

    #[tokio::test]
    async fn denies_host_outside_allowlist_without_dialing() {
        let allow: HashSet<String> = ["api.example.com".to_string()].into_iter().collect();
        let net = Network::new(
            manifest(vec![Capability::Network]),
            Arc::new(ResilientOutboundClient::new("oracle-net")),
            allow,
        );
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        let req = OutboundRequest::get("https://evil.example.org/steal", deadline);
        let err = net.fetch(req).await.unwrap_err();
        assert_eq!(err.kind(), svc_core::ErrorKind::CapabilityDenied);
    }

    #[tokio::test]
    async fn denies_without_network_capability() {
        let net = Network::new(
            manifest(vec![]),
            Arc::new(ResilientOutboundClient::new("oracle-net")),
            HashSet::new(),
        );
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        let req = OutboundRequest::get("https://api.example.com/price", deadline);
        let err = net.fetch(req).await.unwrap_err();
        assert_eq!(err.kind(), svc_core::ErrorKind::CapabilityDenied);
    }
}
