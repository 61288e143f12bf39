//! The credential decision procedure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::Query,
    http::{HeaderMap, HeaderName, header::AUTHORIZATION, request::Parts},
    response::IntoResponse,
};
use jellystat_core::{ApiKeyEntry, AuthSettings, Store, StoreError, config::AuthConfig};

use super::Rejection;
use super::jwt::BearerVerifier;
use crate::GatewayError;
use crate::guard::{Guard, GuardOutcome};

/// Source of the configured API keys.
///
/// Implementations must not cache: every call reflects the stored record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Configured keys; `None` if the configuration record or its key list is absent.
    async fn api_keys(&self) -> Result<Option<Vec<ApiKeyEntry>>, StoreError>;
}

#[async_trait]
impl CredentialStore for Store {
    async fn api_keys(&self) -> Result<Option<Vec<ApiKeyEntry>>, StoreError> {
        crate::store_io::run(self, Store::api_keys).await
    }
}

/// Successful authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorized {
    /// The bearer token's `user` claim; `None` for API key access.
    pub identity: Option<serde_json::Value>,
}

/// Identity attached to an authorized request as an extension.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity(pub Option<serde_json::Value>);

/// Decides whether a request may reach a protected handler.
///
/// A present `Authorization` header always selects the bearer path; the API
/// key path is only consulted when that header is absent.
pub struct AuthGateway {
    verifier: BearerVerifier,
    credentials: Arc<dyn CredentialStore>,
    api_key_header: HeaderName,
    api_key_query_param: String,
}

impl AuthGateway {
    /// Create a gateway.
    ///
    /// # Errors
    ///
    /// Returns error if the configured API key header is not a valid header name.
    pub fn new(
        settings: &AuthSettings,
        config: &AuthConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, GatewayError> {
        let api_key_header = HeaderName::try_from(config.api_key_header.to_lowercase())
            .map_err(|e| GatewayError::Config(format!("Invalid API key header: {e}")))?;

        Ok(Self {
            verifier: BearerVerifier::new(settings),
            credentials,
            api_key_header,
            api_key_query_param: config.api_key_query_param.clone(),
        })
    }

    /// Evaluate the credentials of a request.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] for the first check that fails.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<Authorized, Rejection> {
        if let Some(value) = headers.get(AUTHORIZATION) {
            match value.to_str() {
                Ok("") => {}
                Ok(raw) => return self.authenticate_bearer(raw),
                Err(_) => return Err(Rejection::MalformedBearer),
            }
        }

        let api_key = headers
            .get(&self.api_key_header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .or_else(|| {
                query
                    .get(&self.api_key_query_param)
                    .map(String::as_str)
                    .filter(|v| !v.is_empty())
            })
            .ok_or(Rejection::NoCredential)?;

        self.authenticate_api_key(api_key).await
    }

    fn authenticate_bearer(&self, header: &str) -> Result<Authorized, Rejection> {
        let token = header
            .split(char::is_whitespace)
            .nth(1)
            .filter(|t| !t.is_empty() && *t != "null")
            .ok_or(Rejection::MalformedBearer)?;

        match self.verifier.verify(token) {
            Ok(claims) => Ok(Authorized {
                identity: Some(claims.user),
            }),
            Err(e) => {
                tracing::warn!("Bearer token rejected: {}", e);
                Err(Rejection::InvalidSignature)
            }
        }
    }

    async fn authenticate_api_key(&self, presented: &str) -> Result<Authorized, Rejection> {
        let keys = self.credentials.api_keys().await.map_err(|e| {
            tracing::error!("Failed to read API keys: {}", e);
            Rejection::StoreUnavailable
        })?;

        let keys = match keys {
            Some(keys) if !keys.is_empty() => keys,
            _ => return Err(Rejection::NoKeysConfigured),
        };

        if keys.iter().any(|entry| entry.key == presented) {
            Ok(Authorized { identity: None })
        } else {
            Err(Rejection::InvalidApiKey)
        }
    }
}

impl std::fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGateway")
            .field("api_key_header", &self.api_key_header)
            .field("api_key_query_param", &self.api_key_query_param)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Guard for AuthGateway {
    async fn check(&self, parts: &mut Parts) -> GuardOutcome {
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();

        match self.authenticate(&parts.headers, &query).await {
            Ok(authorized) => {
                parts.extensions.insert(Identity(authorized.identity));
                GuardOutcome::Continue
            }
            Err(rejection) => {
                tracing::debug!(
                    path = %parts.uri.path(),
                    kind = rejection.kind(),
                    "Request rejected"
                );
                GuardOutcome::Reject(rejection.into_response())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_tokens::{SECRET, sign, valid};
    use axum::http::HeaderValue;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory key source that counts reads.
    struct FixedKeys {
        keys: Option<Vec<ApiKeyEntry>>,
        reads: AtomicUsize,
    }

    impl FixedKeys {
        fn new(keys: Option<Vec<&str>>) -> Arc<Self> {
            Arc::new(Self {
                keys: keys.map(|keys| keys.into_iter().map(ApiKeyEntry::new).collect()),
                reads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CredentialStore for FixedKeys {
        async fn api_keys(&self) -> Result<Option<Vec<ApiKeyEntry>>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.keys.clone())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CredentialStore for BrokenStore {
        async fn api_keys(&self) -> Result<Option<Vec<ApiKeyEntry>>, StoreError> {
            Err(StoreError::Corrupt("unreadable".to_string()))
        }
    }

    fn gateway(credentials: Arc<dyn CredentialStore>) -> AuthGateway {
        AuthGateway::new(
            &AuthSettings::new(SECRET).unwrap(),
            &AuthConfig::default(),
            credentials,
        )
        .unwrap()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let gw = gateway(FixedKeys::new(Some(vec!["abc123"])));
        let result = gw.authenticate(&HeaderMap::new(), &HashMap::new()).await;
        assert_eq!(result, Err(Rejection::NoCredential));
    }

    #[tokio::test]
    async fn test_valid_bearer_attaches_user_claim() {
        let gw = gateway(FixedKeys::new(None));
        let user = json!({"id": 7, "username": "admin"});
        let token = valid(user.clone());

        let result = gw
            .authenticate(
                &headers(&[("authorization", &format!("Bearer {token}"))]),
                &HashMap::new(),
            )
            .await;

        assert_eq!(result, Ok(Authorized { identity: Some(user) }));
    }

    #[tokio::test]
    async fn test_scheme_is_not_checked() {
        let gw = gateway(FixedKeys::new(None));
        let token = valid(json!("admin"));

        let result = gw
            .authenticate(
                &headers(&[("authorization", &format!("Token {token}"))]),
                &HashMap::new(),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_bearer() {
        let gw = gateway(FixedKeys::new(Some(vec!["abc123"])));

        for value in ["Bearer", "Bearer null", "Bearer  token", "abc"] {
            let result = gw
                .authenticate(&headers(&[("authorization", value)]), &HashMap::new())
                .await;
            assert_eq!(result, Err(Rejection::MalformedBearer), "header {value:?}");
        }
    }

    #[tokio::test]
    async fn test_malformed_bearer_never_falls_back_to_api_key() {
        let keys = FixedKeys::new(Some(vec!["abc123"]));
        let gw = gateway(keys.clone());

        let result = gw
            .authenticate(
                &headers(&[("authorization", "Bearer null"), ("x-api-token", "abc123")]),
                &query(&[("apiKey", "abc123")]),
            )
            .await;

        assert_eq!(result, Err(Rejection::MalformedBearer));
        assert_eq!(keys.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_bearer_never_falls_back_to_api_key() {
        let gw = gateway(FixedKeys::new(Some(vec!["abc123"])));
        let token = sign("wrong-secret", json!("admin"), 3600);

        let result = gw
            .authenticate(
                &headers(&[
                    ("authorization", &format!("Bearer {token}")),
                    ("x-api-token", "abc123"),
                ]),
                &HashMap::new(),
            )
            .await;

        assert_eq!(result, Err(Rejection::InvalidSignature));
    }

    #[tokio::test]
    async fn test_expired_bearer() {
        let gw = gateway(FixedKeys::new(None));
        let token = sign(SECRET, json!("admin"), -60);

        let result = gw
            .authenticate(
                &headers(&[("authorization", &format!("Bearer {token}"))]),
                &HashMap::new(),
            )
            .await;

        assert_eq!(result, Err(Rejection::InvalidSignature));
    }

    #[tokio::test]
    async fn test_empty_authorization_header_uses_api_key() {
        let gw = gateway(FixedKeys::new(Some(vec!["abc123"])));

        let result = gw
            .authenticate(
                &headers(&[("authorization", ""), ("x-api-token", "abc123")]),
                &HashMap::new(),
            )
            .await;

        assert_eq!(result, Ok(Authorized { identity: None }));
    }

    #[tokio::test]
    async fn test_api_key_from_header_or_query() {
        let gw = gateway(FixedKeys::new(Some(vec!["other", "abc123"])));

        let from_header = gw
            .authenticate(&headers(&[("x-api-token", "abc123")]), &HashMap::new())
            .await;
        assert_eq!(from_header, Ok(Authorized { identity: None }));

        let from_query = gw
            .authenticate(&HeaderMap::new(), &query(&[("apiKey", "abc123")]))
            .await;
        assert_eq!(from_query, Ok(Authorized { identity: None }));
    }

    #[tokio::test]
    async fn test_api_key_header_takes_precedence() {
        let gw = gateway(FixedKeys::new(Some(vec!["abc123"])));

        let result = gw
            .authenticate(
                &headers(&[("x-api-token", "wrong")]),
                &query(&[("apiKey", "abc123")]),
            )
            .await;

        assert_eq!(result, Err(Rejection::InvalidApiKey));
    }

    #[tokio::test]
    async fn test_no_keys_configured() {
        for keys in [FixedKeys::new(None), FixedKeys::new(Some(vec![]))] {
            let gw = gateway(keys);
            let result = gw
                .authenticate(&HeaderMap::new(), &query(&[("apiKey", "abc123")]))
                .await;
            assert_eq!(result, Err(Rejection::NoKeysConfigured));
        }
    }

    #[tokio::test]
    async fn test_invalid_api_key() {
        let gw = gateway(FixedKeys::new(Some(vec!["other"])));
        let result = gw
            .authenticate(&HeaderMap::new(), &query(&[("apiKey", "abc123")]))
            .await;
        assert_eq!(result, Err(Rejection::InvalidApiKey));
    }

    #[tokio::test]
    async fn test_every_api_key_request_reads_the_store() {
        let keys = FixedKeys::new(Some(vec!["abc123"]));
        let gw = gateway(keys.clone());

        for _ in 0..3 {
            gw.authenticate(&HeaderMap::new(), &query(&[("apiKey", "abc123")]))
                .await
                .unwrap();
        }

        assert_eq!(keys.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_store_failure() {
        let gw = gateway(Arc::new(BrokenStore));
        let result = gw
            .authenticate(&HeaderMap::new(), &query(&[("apiKey", "abc123")]))
            .await;
        assert_eq!(result, Err(Rejection::StoreUnavailable));
    }

    #[tokio::test]
    async fn test_sled_store_lookup() {
        let store = Store::temporary().unwrap();
        store.migrate().unwrap();
        let gw = gateway(Arc::new(store.clone()));

        let result = gw
            .authenticate(&HeaderMap::new(), &query(&[("apiKey", "abc123")]))
            .await;
        assert_eq!(result, Err(Rejection::NoKeysConfigured));

        store
            .set_api_keys(vec![ApiKeyEntry::new("abc123")])
            .unwrap();
        let result = gw
            .authenticate(&HeaderMap::new(), &query(&[("apiKey", "abc123")]))
            .await;
        assert_eq!(result, Ok(Authorized { identity: None }));
    }

    #[tokio::test]
    async fn test_guard_inserts_identity() {
        let gw = gateway(FixedKeys::new(None));
        let token = valid(json!("admin"));

        let request = axum::http::Request::builder()
            .uri("/api/whoami")
            .header("authorization", format!("Bearer {token}"))
            .body(())
            .unwrap();
        let (mut parts, ()) = request.into_parts();

        assert!(matches!(gw.check(&mut parts).await, GuardOutcome::Continue));
        assert_eq!(
            parts.extensions.get::<Identity>(),
            Some(&Identity(Some(json!("admin"))))
        );
    }

    #[tokio::test]
    async fn test_guard_reads_query_api_key() {
        let gw = gateway(FixedKeys::new(Some(vec!["abc123"])));

        let request = axum::http::Request::builder()
            .uri("/backup/files?apiKey=abc123")
            .body(())
            .unwrap();
        let (mut parts, ()) = request.into_parts();

        assert!(matches!(gw.check(&mut parts).await, GuardOutcome::Continue));
        assert_eq!(parts.extensions.get::<Identity>(), Some(&Identity(None)));
    }
}
