//! Prefix-to-handler routing table.
//!
//! Route groups are registered once at startup, then frozen into a single
//! axum [`Router`]. Protected groups are wrapped with the guard chain so a
//! rejection short-circuits before the group's handlers (or the fallback)
//! are reached. Public groups never see the guards.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::Request,
    middleware::from_fn_with_state,
    response::Response,
};
use tower::ServiceExt;

use crate::GatewayError;
use crate::guard::{Guard, GuardChain, run_guards};

/// Whether a route group requires authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Reachable without credentials.
    Public,
    /// Guarded by the registry's guard chain.
    Protected,
}

struct RouteEntry {
    prefix: String,
    access: Access,
    router: Router,
}

/// Builder for the frozen [`Routes`] table.
pub struct RouteRegistry {
    guards: GuardChain,
    entries: Vec<RouteEntry>,
    fallback: Router,
}

impl RouteRegistry {
    /// Create a registry whose protected groups run `guards` in order.
    #[must_use]
    pub fn new(guards: Vec<Arc<dyn Guard>>) -> Self {
        Self {
            guards: Arc::new(guards),
            entries: Vec::new(),
            fallback: Router::new(),
        }
    }

    /// Register a route group under `prefix`.
    #[must_use]
    pub fn register(mut self, prefix: impl Into<String>, access: Access, router: Router) -> Self {
        self.entries.push(RouteEntry {
            prefix: prefix.into(),
            access,
            router,
        });
        self
    }

    /// Service used for every path no group handles.
    ///
    /// Unmatched paths below a protected prefix still pass through the guards
    /// before reaching it.
    #[must_use]
    pub fn fallback(mut self, router: Router) -> Self {
        self.fallback = router;
        self
    }

    /// Freeze the table.
    ///
    /// # Errors
    ///
    /// Returns error if a prefix is not of the form `/segment` or is
    /// registered twice.
    pub fn freeze(self) -> Result<Routes, GatewayError> {
        let mut table: Vec<(String, Access)> = Vec::with_capacity(self.entries.len());
        let mut router = Router::new();

        for entry in self.entries {
            let prefix = normalize_prefix(&entry.prefix)?;
            if table.iter().any(|(existing, _)| *existing == prefix) {
                return Err(GatewayError::Config(format!(
                    "Route prefix registered twice: {prefix}"
                )));
            }

            let mut group = entry.router.fallback_service(self.fallback.clone());
            if entry.access == Access::Protected {
                group = group.layer(from_fn_with_state(self.guards.clone(), run_guards));

                // `nest` leaves `{prefix}/` to the outer fallback
                let guarded_fallback = Router::new()
                    .fallback_service(self.fallback.clone())
                    .layer(from_fn_with_state(self.guards.clone(), run_guards));
                router = router.route_service(
                    &format!("{prefix}/"),
                    guarded_fallback.into_service::<Body>(),
                );
            }

            tracing::debug!(prefix = %prefix, access = ?entry.access, "Registered route group");
            router = router.nest(&prefix, group);
            table.push((prefix, entry.access));
        }

        Ok(Routes {
            router: router.fallback_service(self.fallback),
            table,
        })
    }
}

impl std::fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRegistry")
            .field("guards", &self.guards.len())
            .field(
                "entries",
                &self
                    .entries
                    .iter()
                    .map(|e| (e.prefix.as_str(), e.access))
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

fn normalize_prefix(prefix: &str) -> Result<String, GatewayError> {
    let trimmed = prefix.trim_end_matches('/');
    if !trimmed.starts_with('/') || trimmed.len() < 2 {
        return Err(GatewayError::Config(format!(
            "Invalid route prefix: {prefix:?}"
        )));
    }
    Ok(trimmed.to_string())
}

/// The immutable routing table.
#[derive(Clone)]
pub struct Routes {
    router: Router,
    table: Vec<(String, Access)>,
}

impl Routes {
    /// Route a single request.
    pub async fn dispatch(&self, request: Request) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|never| match never {})
    }

    /// Whether a request for `path` passes through the guards.
    #[must_use]
    pub fn requires_auth(&self, path: &str) -> bool {
        self.access_for(path) == Some(Access::Protected)
    }

    /// Access level of the group owning `path`, if any group does.
    #[must_use]
    pub fn access_for(&self, path: &str) -> Option<Access> {
        self.table
            .iter()
            .find(|(prefix, _)| {
                path.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .map(|(_, access)| *access)
    }

    /// Registered prefixes in registration order.
    pub fn prefixes(&self) -> impl Iterator<Item = (&str, Access)> {
        self.table.iter().map(|(p, a)| (p.as_str(), *a))
    }

    /// Convert into the underlying router.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }
}

impl std::fmt::Debug for Routes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routes")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
