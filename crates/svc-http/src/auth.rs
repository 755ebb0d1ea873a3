//! Bearer-token authentication and per-account ownership checks (spec.md
//! §4.7, §6 `API_TOKENS`).
//!
//! `API_TOKENS` is a comma-separated list of `account_id:token` pairs —
//! one shared secret per account, not one global secret — so that the
//! token itself both authenticates the caller and scopes every
//! subsequent store lookup to that account.

use std::collections::HashMap;
use svc_core::{AccountId, ServiceError};

pub struct TokenStore {
    tokens: HashMap<String, AccountId>,
}

impl TokenStore {
    pub fn new(tokens: HashMap<String, AccountId>) -> Self {
        Self { tokens }
    }

    /// Parses `API_TOKENS` as `account_id:token[,account_id:token...]`.
    /// Malformed entries are skipped with a warning rather than failing
    /// startup outright — an operator typo in one entry should not take
    /// down every other account's access.
    pub fn from_env_value(value: &str) -> Self {
        let mut tokens = HashMap::new();
        for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match entry.split_once(':') {
                Some((account, token)) if !account.is_empty() && !token.is_empty() => {
                    tokens.insert(token.to_string(), AccountId::from(account));
                }
                _ => tracing::warn!(entry, "skipping malformed API_TOKENS entry"),
            }
        }
        Self::new(tokens)
    }

    /// Extracts the bearer token from an `Authorization` header value and
    /// resolves it to the owning account.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<AccountId, ServiceError> {
        let header = authorization.ok_or_else(|| ServiceError::Unauthorized("missing Authorization header".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("Authorization header is not a bearer token".into()))?;
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("unknown bearer token".into()))
    }
}
