//! Ordered request guards.
//!
//! A protected route group carries a chain of guards. Each guard inspects the
//! request head and either lets it through or produces the final response.
//! The chain stops at the first rejection; the handler never runs after one.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

/// Result of a single guard check.
#[derive(Debug)]
pub enum GuardOutcome {
    /// Hand the request to the next guard, or the handler.
    Continue,
    /// Stop here and send this response.
    Reject(Response),
}

/// A check run before a protected handler.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Inspect (and possibly annotate) the request head.
    async fn check(&self, parts: &mut Parts) -> GuardOutcome;
}

/// Guards applied to one route group, in order.
pub type GuardChain = Arc<Vec<Arc<dyn Guard>>>;

/// Middleware running a [`GuardChain`] ahead of the wrapped service.
pub async fn run_guards(
    State(guards): State<GuardChain>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    for guard in guards.iter() {
        if let GuardOutcome::Reject(response) = guard.check(&mut parts).await {
            return response;
        }
    }

    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::StatusCode,
        middleware::from_fn_with_state,
        response::IntoResponse,
        routing::get,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[derive(Clone)]
    struct Seen;

    struct Counting {
        calls: Arc<AtomicUsize>,
        reject: Option<StatusCode>,
    }

    #[async_trait]
    impl Guard for Counting {
        async fn check(&self, parts: &mut Parts) -> GuardOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reject {
                Some(status) => GuardOutcome::Reject(status.into_response()),
                None => {
                    parts.extensions.insert(Seen);
                    GuardOutcome::Continue
                }
            }
        }
    }

    fn counting(calls: &Arc<AtomicUsize>, reject: Option<StatusCode>) -> Arc<dyn Guard> {
        Arc::new(Counting {
            calls: calls.clone(),
            reject,
        })
    }

    fn app(guards: Vec<Arc<dyn Guard>>, handler_calls: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/",
                get(move |req: Request| {
                    handler_calls.fetch_add(1, Ordering::SeqCst);
                    let seen = req.extensions().get::<Seen>().is_some();
                    async move { if seen { "seen" } else { "unseen" } }
                }),
            )
            .layer(from_fn_with_state(Arc::new(guards), run_guards))
    }

    #[tokio::test]
    async fn test_all_guards_continue() {
        let guard_calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = Arc::new(AtomicUsize::new(0));
        let guards = vec![counting(&guard_calls, None), counting(&guard_calls, None)];

        let response = app(guards, handler_calls.clone())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"seen");
        assert_eq!(guard_calls.load(Ordering::SeqCst), 2);
        assert_eq!(handler_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_rejection_stops_chain() {
        let guard_calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = Arc::new(AtomicUsize::new(0));
        let guards = vec![
            counting(&guard_calls, Some(StatusCode::FORBIDDEN)),
            counting(&guard_calls, None),
        ];

        let response = app(guards, handler_calls.clone())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(guard_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
    }
}
