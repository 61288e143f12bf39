//! # Jellystat Gateway
//!
//! HTTP/WebSocket gateway for Jellystat: credential checks in front of the
//! protected route groups, the ordered startup pipeline and the periodic
//! background jobs it launches.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication: bearer tokens and API keys.
pub mod auth;
/// Ordered startup pipeline.
pub mod bootstrap;
/// WebSocket push events.
pub mod events;
/// Request guards run before protected handlers.
pub mod guard;
/// Prefix-to-handler routing table.
pub mod registry;
/// Route-group handlers.
pub mod routes;
mod server;
mod store_io;
/// Periodic background jobs.
pub mod tasks;
/// Static front-end with client-side routing fallback.
pub mod ui_server;

pub use auth::{AuthGateway, Authorized, CredentialStore, Identity, Rejection};
pub use bootstrap::{
    Boot, Bootstrapper, PipelineState, STARTUP_LOG_TARGET, ShutdownHandle, Stage, StartupError,
};
pub use events::{EventBroadcaster, UiEvent, UiEventEnvelope};
pub use guard::{Guard, GuardOutcome};
pub use registry::{Access, RouteRegistry, Routes};
pub use server::{AppState, build_router, build_routes};
pub use tasks::{BackgroundJob, JobError, JobHandles, JobReport, JobSet, TaskScheduler};

/// Version of the gateway crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
