//! Static front-end with client-side routing fallback.
//!
//! Files are served from the built bundle directory. Any path that does not
//! name a file gets `index.html`, so the client-side router can take over.

use std::path::Path;

use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

/// Document served for every path that is not a file.
pub const INDEX_DOCUMENT: &str = "index.html";

/// Create the catch-all router for `dist_dir`.
pub fn spa_fallback(dist_dir: &Path) -> Router {
    if !dist_dir.join(INDEX_DOCUMENT).is_file() {
        tracing::warn!(
            path = %dist_dir.display(),
            "UI bundle not found, unmatched paths will return 404"
        );
    }

    let index = ServeFile::new(dist_dir.join(INDEX_DOCUMENT));
    let files = ServeDir::new(dist_dir)
        .append_index_html_on_directories(true)
        .fallback(index);

    Router::new().fallback_service(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, extract::Request, http::StatusCode};
    use tower::ServiceExt;

    fn bundle() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_DOCUMENT), "<html>jellystat</html>").unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/app.js"), "console.log(1)").unwrap();
        dir
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_serves_existing_file() {
        let dir = bundle();
        let (status, body) = get(spa_fallback(dir.path()), "/assets/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "console.log(1)");
    }

    #[tokio::test]
    async fn test_client_route_gets_index() {
        let dir = bundle();
        for uri in ["/", "/libraries/42", "/settings"] {
            let (status, body) = get(spa_fallback(dir.path()), uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body, "<html>jellystat</html>", "{uri}");
        }
    }

    #[tokio::test]
    async fn test_missing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let (status, _) = get(spa_fallback(&dir.path().join("dist")), "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
