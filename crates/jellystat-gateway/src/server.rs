//! Gateway server.

use std::sync::Arc;

use axum::{Router, routing::get};
use jellystat_core::{Config, Store};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::GatewayError;
use crate::auth::AuthGateway;
use crate::events::{EventBroadcaster, ws_handler};
use crate::guard::Guard;
use crate::registry::{RouteRegistry, Routes};
use crate::routes;
use crate::tasks::JobSet;
use crate::ui_server;

/// State shared by the route-group handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The backing store.
    pub store: Store,
    /// UI event broadcaster.
    pub events: EventBroadcaster,
    /// The periodic jobs, for on-demand passes.
    pub jobs: JobSet,
}

impl AppState {
    /// Create the shared state.
    #[must_use]
    pub const fn new(store: Store, events: EventBroadcaster, jobs: JobSet) -> Self {
        Self {
            store,
            events,
            jobs,
        }
    }
}

/// Build the frozen routing table: every route group plus the UI fallback.
///
/// # Errors
///
/// Returns error if a route group cannot be registered.
pub fn build_routes(
    state: &AppState,
    gateway: AuthGateway,
    config: &Config,
) -> Result<Routes, GatewayError> {
    let guards: Vec<Arc<dyn Guard>> = vec![Arc::new(gateway)];

    routes::register_groups(RouteRegistry::new(guards), state)
        .fallback(ui_server::spa_fallback(&config.ui.dist_dir))
        .freeze()
}

/// Build the complete application router.
///
/// The `/ws` push endpoint sits beside the routing table and is reachable
/// without credentials.
///
/// # Errors
///
/// Returns error if a route group cannot be registered.
pub fn build_router(
    state: &AppState,
    gateway: AuthGateway,
    config: &Config,
) -> Result<Router, GatewayError> {
    let routes = build_routes(state, gateway, config)?;

    let push = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state.events.clone());

    let mut app = push
        .merge(routes.into_router())
        .layer(TraceLayer::new_for_http());

    if config.server.cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    Ok(app)
}


#[cfg(test)]
mod tests {
    use super::test_support::{send, state};
    use super::*;
    use crate::auth::test_tokens::{SECRET, valid};
    use axum::{body::Body, extract::Request, http::StatusCode};
    use jellystat_core::{ApiKeyEntry, AuthSettings, config::AuthConfig};
    use serde_json::json;

    struct Harness {
        app: Router,
        state: AppState,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn harness() -> Harness {
        let (state, backup_dir) = state();
        let dist = tempfile::tempdir().unwrap();
        std::fs::write(dist.path().join("index.html"), "<html>jellystat</html>").unwrap();

        let mut config = Config::default();
        config.ui.dist_dir = dist.path().to_path_buf();

        let gateway = AuthGateway::new(
            &AuthSettings::new(SECRET).unwrap(),
            &AuthConfig::default(),
            Arc::new(state.store.clone()),
        )
        .unwrap();

        Harness {
            app: build_router(&state, gateway, &config).unwrap(),
            state,
            _dirs: (backup_dir, dist),
        }
    }

    fn request(uri: &str) -> axum::http::request::Builder {
        Request::builder().uri(uri)
    }

    #[tokio::test]
    async fn test_bearer_request_reaches_handler_with_identity() {
        let h = harness();
        let user = json!({"id": "u1", "name": "admin"});
        let token = valid(user.clone());

        let (status, body) = send(
            h.app,
            request("/api/whoami")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"], user);
        assert_eq!(body["method"], "bearer");
    }

    #[tokio::test]
    async fn test_handler_decides_status_for_authorized_request() {
        let h = harness();
        let token = valid(json!("admin"));

        let (status, _) = send(
            h.app,
            request("/api/keys")
                .method("DELETE")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"key":"missing"}"#))
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_api_key_on_backup_group() {
        let h = harness();
        h.state
            .store
            .set_api_keys(vec![ApiKeyEntry::new("abc123")])
            .unwrap();

        let (status, body) = send(
            h.app.clone(),
            request("/backup/beginBackup?apiKey=abc123")
                .method("POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job"], "backup");

        h.state
            .store
            .set_api_keys(vec![ApiKeyEntry::new("other")])
            .unwrap();

        let (status, body) = send(
            h.app,
            request("/backup/beginBackup?apiKey=abc123")
                .method("POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({"message": "Invalid API key"}));
    }

    #[tokio::test]
    async fn test_swagger_needs_no_credentials() {
        let h = harness();
        let (status, body) = send(h.app, request("/swagger").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["openapi"], "3.0.3");
    }

    #[tokio::test]
    async fn test_every_protected_group_rejects_anonymous_requests() {
        let h = harness();
        for uri in [
            "/api/",
            "/api/keys",
            "/sync/beginSync",
            "/stats/jobs",
            "/backup/beginBackup",
            "/logs/getLogs",
            "/utils/version",
        ] {
            let (status, body) =
                send(h.app.clone(), request(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(
                body["message"],
                "Authentication failed. No token or API key provided.",
                "{uri}"
            );
        }
    }

    #[tokio::test]
    async fn test_no_keys_configured() {
        let h = harness();
        let (status, body) = send(
            h.app,
            request("/utils/version")
                .header("x-api-token", "abc123")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "No API keys configured");
    }

    #[tokio::test]
    async fn test_malformed_bearer_with_valid_api_key() {
        let h = harness();
        h.state
            .store
            .set_api_keys(vec![ApiKeyEntry::new("abc123")])
            .unwrap();

        let (status, body) = send(
            h.app,
            request("/utils/version?apiKey=abc123")
                .header("authorization", "Bearer null")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Malformed authorization header");
    }

    #[tokio::test]
    async fn test_public_and_fallback_paths() {
        let h = harness();

        let (status, body) = send(
            h.app.clone(),
            request("/auth/isConfigured").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"state": 1}));

        let (status, body) = send(
            h.app,
            request("/libraries/1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("<html>jellystat</html>"));
    }

    #[tokio::test]
    async fn test_websocket_route_is_not_guarded() {
        let h = harness();
        // A plain GET without upgrade headers is refused by the upgrade
        // extractor, not by the guards.
        let (status, _) = send(h.app, request("/ws").body(Body::empty()).unwrap()).await;
        assert_ne!(status, StatusCode::UNAUTHORIZED);
        assert_ne!(status, StatusCode::FORBIDDEN);
    }
}
