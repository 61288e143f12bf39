//! Ordered startup pipeline.
//!
//! `Start → Provisioning → Migrating → Listening → Running`, with
//! `Failed(stage)` reachable from any step before `Running`. Each stage
//! completes before the next begins, and the periodic jobs are only launched
//! once the listener is accepting connections.
//!
//! What a failed stage does to the process is decided by
//! [`StartupPolicy`]: `LogAndContinue` reports the failure on the
//! [`STARTUP_LOG_TARGET`] target and hands back a [`Boot`] that never reached
//! `Running`; `Exit` returns the error to the caller.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use jellystat_core::{AuthSettings, Config, ProvisionOutcome, StartupPolicy, Store, StoreError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::GatewayError;
use crate::auth::AuthGateway;
use crate::events::EventBroadcaster;
use crate::server::{AppState, build_router};
use crate::tasks::{JobHandles, JobSet, TaskScheduler};

/// Log target for startup stage failures.
pub const STARTUP_LOG_TARGET: &str = "jellystat::startup";

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Ensure the backing store exists.
    Provision,
    /// Apply pending schema migrations.
    Migrate,
    /// Bind the listener and start serving.
    Listen,
    /// Start the periodic jobs.
    Launch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provision => write!(f, "provision"),
            Self::Migrate => write!(f, "migrate"),
            Self::Listen => write!(f, "listen"),
            Self::Launch => write!(f, "launch"),
        }
    }
}

/// Observable pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing has run yet.
    Start,
    /// Creating the store.
    Provisioning,
    /// Applying migrations.
    Migrating,
    /// Listener bound and accepting connections.
    Listening,
    /// Jobs launched; steady state.
    Running,
    /// The named stage failed; later stages did not run.
    Failed(Stage),
}

/// Why a stage failed.
#[derive(Debug, Error)]
pub enum StageFailure {
    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Listener error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Router or gateway construction error.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A blocking stage task panicked or was cancelled.
    #[error("Stage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A failed startup stage.
#[derive(Debug, Error)]
#[error("Startup stage '{stage}' failed: {source}")]
pub struct StartupError {
    /// The stage that failed.
    pub stage: Stage,
    /// The underlying failure.
    #[source]
    pub source: StageFailure,
}

impl StartupError {
    fn at(stage: Stage) -> impl FnOnce(StageFailure) -> Self {
        move |source| Self { stage, source }
    }
}

type JobBuilder = Box<dyn FnOnce(&Store, &EventBroadcaster) -> JobSet + Send>;

/// Runs the startup pipeline.
pub struct Bootstrapper {
    config: Config,
    settings: AuthSettings,
    policy: StartupPolicy,
    events: EventBroadcaster,
    job_builder: Option<JobBuilder>,
    state: watch::Sender<PipelineState>,
}

impl Bootstrapper {
    /// Create a pipeline for `config`.
    ///
    /// Holding [`AuthSettings`] means the signing secret was already checked.
    #[must_use]
    pub fn new(config: Config, settings: AuthSettings) -> Self {
        let (state, _) = watch::channel(PipelineState::Start);
        Self {
            policy: config.startup.on_failure,
            config,
            settings,
            events: EventBroadcaster::new(),
            job_builder: None,
            state,
        }
    }

    /// Override the failure policy from the configuration.
    #[must_use]
    pub const fn with_policy(mut self, policy: StartupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the standard jobs.
    #[must_use]
    pub fn with_jobs<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&Store, &EventBroadcaster) -> JobSet + Send + 'static,
    {
        self.job_builder = Some(Box::new(build));
        self
    }

    /// Watch the pipeline state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Run every stage in order.
    ///
    /// # Errors
    ///
    /// Returns the failed stage under [`StartupPolicy::Exit`]. Under
    /// [`StartupPolicy::LogAndContinue`] a failure is logged and carried in
    /// the returned [`Boot`] instead.
    pub async fn run(mut self) -> Result<Boot, StartupError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut boot = Boot {
            state: self.state.subscribe(),
            local_addr: None,
            server: None,
            jobs: JobHandles::default(),
            failure: None,
            shutdown: Arc::new(shutdown_tx),
        };

        match self.pipeline(&mut boot, shutdown_rx).await {
            Ok(()) => Ok(boot),
            Err(error) => {
                self.state.send_replace(PipelineState::Failed(error.stage));
                tracing::error!(
                    target: STARTUP_LOG_TARGET,
                    stage = %error.stage,
                    policy = %self.policy,
                    "{}",
                    error
                );

                match self.policy {
                    StartupPolicy::Exit => {
                        boot.shutdown();
                        Err(error)
                    }
                    StartupPolicy::LogAndContinue => {
                        boot.failure = Some(error);
                        Ok(boot)
                    }
                }
            }
        }
    }

    async fn pipeline(
        &mut self,
        boot: &mut Boot,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), StartupError> {
        let data_dir = self.config.data_dir();

        self.state.send_replace(PipelineState::Provisioning);
        Self::provision(data_dir.clone())
            .await
            .map_err(StartupError::at(Stage::Provision))?;

        self.state.send_replace(PipelineState::Migrating);
        let store = Self::migrate(data_dir)
            .await
            .map_err(StartupError::at(Stage::Migrate))?;

        let jobs = match self.job_builder.take() {
            Some(build) => build(&store, &self.events),
            None => JobSet::standard(store.clone(), self.events.clone(), &self.config),
        };
        let app_state = AppState::new(store, self.events.clone(), jobs.clone());

        let (addr, server) = self
            .listen(&app_state, shutdown)
            .await
            .map_err(StartupError::at(Stage::Listen))?;
        boot.local_addr = Some(addr);
        boot.server = Some(server);
        self.state.send_replace(PipelineState::Listening);

        self.state.send_replace(PipelineState::Running);
        boot.jobs = TaskScheduler::launch(&jobs);
        tracing::info!(jobs = ?boot.jobs.names(), "Startup complete");

        Ok(())
    }

    async fn provision(data_dir: PathBuf) -> Result<(), StageFailure> {
        let outcome = tokio::task::spawn_blocking(move || Store::provision(&data_dir)).await??;
        match outcome {
            ProvisionOutcome::Created => tracing::info!("Database provisioned"),
            ProvisionOutcome::AlreadyPresent => tracing::debug!("Database already provisioned"),
        }
        Ok(())
    }

    async fn migrate(data_dir: PathBuf) -> Result<Store, StageFailure> {
        let (store, applied) = tokio::task::spawn_blocking(move || {
            let store = Store::open(&data_dir)?;
            let applied = store.migrate()?;
            Ok::<_, StoreError>((store, applied))
        })
        .await??;

        if applied.is_empty() {
            tracing::debug!("Schema is up to date");
        } else {
            tracing::info!(migrations = ?applied, "Applied migrations");
        }
        Ok(store)
    }

    async fn listen(
        &self,
        app_state: &AppState,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, JoinHandle<std::io::Result<()>>), StageFailure> {
        let gateway = AuthGateway::new(
            &self.settings,
            &self.config.auth,
            Arc::new(app_state.store.clone()),
        )?;
        let app = build_router(app_state, gateway, &self.config)?;

        let listener = TcpListener::bind(self.config.listen_address()).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Server listening on: http://{}", addr);

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    // A dropped sender also ends the wait
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await
        });

        Ok((addr, server))
    }
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("policy", &self.policy)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// The outcome of the pipeline: the running server and jobs, or the failure.
#[derive(Debug)]
pub struct Boot {
    state: watch::Receiver<PipelineState>,
    local_addr: Option<SocketAddr>,
    server: Option<JoinHandle<std::io::Result<()>>>,
    jobs: JobHandles,
    failure: Option<StartupError>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Boot {
    /// Current pipeline state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Address the listener is bound to, if the pipeline got that far.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Handles of the launched jobs.
    #[must_use]
    pub const fn jobs(&self) -> &JobHandles {
        &self.jobs
    }

    /// The stage failure, if the pipeline did not reach `Running`.
    #[must_use]
    pub const fn failure(&self) -> Option<&StartupError> {
        self.failure.as_ref()
    }

    /// Handle that stops the server and jobs from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            signal: Arc::clone(&self.shutdown),
        }
    }

    /// Stop the jobs and ask the server to finish.
    pub fn shutdown(&self) {
        self.jobs.abort_all();
        self.shutdown.send_replace(true);
    }

    /// Wait until the server ends, or until shutdown when nothing is serving.
    ///
    /// # Errors
    ///
    /// Returns error if the server task failed.
    pub async fn wait(self) -> Result<(), GatewayError> {
        let result = match self.server {
            Some(server) => match server.await {
                Ok(result) => result.map_err(GatewayError::from),
                Err(e) => Err(GatewayError::Server(format!("Server task failed: {e}"))),
            },
            None => {
                let mut signal = self.shutdown.subscribe();
                let _ = signal.wait_for(|stop| *stop).await;
                Ok(())
            }
        };

        self.jobs.abort_all();
        result
    }
}

/// Cloneable trigger for [`Boot::shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the server to finish.
    pub fn shutdown(&self) {
        self.signal.send_replace(true);
    }
}
