//! Periodic background jobs.
//!
//! Three jobs run for the lifetime of the process: the activity monitor, the
//! library sync and the backup. [`TaskScheduler::launch`] starts each of them
//! exactly once, in that order, and hands back a [`JobHandles`] so the owner
//! can stop them later. Each job keeps its own cadence; there is no restart
//! when a job task ends and no coordination between jobs.

mod activity;
mod backup;
mod sync;

pub use activity::ActivityMonitor;
pub use backup::BackupTask;
pub use sync::SyncTask;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jellystat_core::{Config, JobRun, JobRunOutcome, Store, StoreError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::events::{EventBroadcaster, UiEvent};
use crate::store_io;

/// Errors from a single job pass.
#[derive(Debug, Error)]
pub enum JobError {
    /// Store access failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The job could not do its work.
    #[error("{0}")]
    Failed(String),
}

/// Summary of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Human-readable summary.
    pub message: String,
}

impl JobReport {
    /// Create a report.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A job run on a fixed cadence.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    /// Stable job name, used in the run log and in events.
    fn name(&self) -> &'static str;

    /// Time between passes.
    fn interval(&self) -> Duration;

    /// Whether the first pass runs as soon as the job is launched.
    ///
    /// When `false`, the first pass waits one full interval.
    fn runs_at_launch(&self) -> bool {
        true
    }

    /// Perform one pass.
    async fn run_once(&self) -> Result<JobReport, JobError>;
}

/// The jobs of one process together with what a pass reports into.
#[derive(Clone)]
pub struct JobSet {
    jobs: Vec<Arc<dyn BackgroundJob>>,
    store: Store,
    events: EventBroadcaster,
}

impl JobSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new(store: Store, events: EventBroadcaster) -> Self {
        Self {
            jobs: Vec::new(),
            store,
            events,
        }
    }

    /// The activity monitor, sync and backup jobs, in launch order.
    #[must_use]
    pub fn standard(store: Store, events: EventBroadcaster, config: &Config) -> Self {
        let tasks = &config.tasks;
        let activity = ActivityMonitor::new(events.clone(), tasks.activity_interval());
        let sync = SyncTask::new(store.clone(), tasks.sync_interval());
        let backup = BackupTask::new(store.clone(), config.backup_dir(), tasks.backup_interval());

        Self::new(store, events)
            .with_job(Arc::new(activity))
            .with_job(Arc::new(sync))
            .with_job(Arc::new(backup))
    }

    /// Append a job; jobs launch in the order they were added.
    #[must_use]
    pub fn with_job(mut self, job: Arc<dyn BackgroundJob>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Names of all jobs in launch order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|job| job.name()).collect()
    }

    /// Number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the set has no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// The store passes are recorded in.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Run one pass of the named job immediately.
    ///
    /// Returns `None` if no job has that name.
    ///
    /// # Errors
    ///
    /// Returns error if the run could not be recorded.
    pub async fn run_now(&self, name: &str) -> Option<Result<JobRun, StoreError>> {
        let job = self.jobs.iter().find(|job| job.name() == name)?;
        Some(run_pass(job.as_ref(), &self.store, &self.events).await)
    }
}

impl std::fmt::Debug for JobSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSet")
            .field("jobs", &self.names())
            .finish_non_exhaustive()
    }
}

/// Run a single pass: announce it, run it, record it, announce the result.
///
/// A failing pass is a recorded outcome, not an error.
///
/// # Errors
///
/// Returns error if the run log cannot be written.
pub async fn run_pass(
    job: &dyn BackgroundJob,
    store: &Store,
    events: &EventBroadcaster,
) -> Result<JobRun, StoreError> {
    let name = job.name();
    events.broadcast(UiEvent::JobStarted {
        job: name.to_string(),
    });

    let started = Instant::now();
    let result = job.run_once().await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (outcome, message) = match result {
        Ok(report) => {
            tracing::debug!(job = name, duration_ms, "{}", report.message);
            (JobRunOutcome::Success, report.message)
        }
        Err(e) => {
            tracing::error!(job = name, "Job pass failed: {}", e);
            (JobRunOutcome::Failed, e.to_string())
        }
    };

    let recorded = message.clone();
    let run = store_io::run(store, move |store| {
        store.record_job_run(name, outcome, recorded, duration_ms)
    })
    .await?;

    events.broadcast(UiEvent::JobFinished {
        job: name.to_string(),
        outcome,
        duration_ms,
        message: Some(message),
    });

    Ok(run)
}

/// Handles of launched jobs, in launch order.
#[derive(Debug, Default)]
pub struct JobHandles {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl JobHandles {
    /// Job names in launch order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    /// Number of launched jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether nothing was launched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Whether every job task has ended.
    #[must_use]
    pub fn all_finished(&self) -> bool {
        self.handles.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Stop every job.
    pub fn abort_all(&self) {
        for (name, handle) in &self.handles {
            tracing::debug!(job = name, "Stopping job");
            handle.abort();
        }
    }
}

/// Starts the periodic jobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskScheduler;

impl TaskScheduler {
    /// Start every job of `jobs` once, in order.
    ///
    /// Each job runs its first pass right away (or after one interval, see
    /// [`BackgroundJob::runs_at_launch`]) and then once per interval.
    #[must_use]
    pub fn launch(jobs: &JobSet) -> JobHandles {
        let mut handles = Vec::with_capacity(jobs.len());

        for job in &jobs.jobs {
            let name = job.name();
            tracing::info!(job = name, interval = ?job.interval(), "Starting job");

            let job = Arc::clone(job);
            let store = jobs.store.clone();
            let events = jobs.events.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = interval(job.interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                if !job.runs_at_launch() {
                    // The first tick completes immediately
                    ticker.tick().await;
                }

                loop {
                    ticker.tick().await;
                    if let Err(e) = run_pass(job.as_ref(), &store, &events).await {
                        tracing::error!(job = job.name(), "Failed to record job run: {}", e);
                    }
                }
            });

            handles.push((name, handle));
        }

        JobHandles { handles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeJob {
        name: &'static str,
        fail: bool,
        at_launch: bool,
        passes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BackgroundJob for FakeJob {
        fn name(&self) -> &'static str {
            self.name
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn runs_at_launch(&self) -> bool {
            self.at_launch
        }

        async fn run_once(&self) -> Result<JobReport, JobError> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(JobError::Failed("fake failure".to_string()))
            } else {
                Ok(JobReport::new("fake ok"))
            }
        }
    }

    fn fake_job(name: &'static str, fail: bool) -> (Arc<dyn BackgroundJob>, Arc<AtomicUsize>) {
        let passes = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(FakeJob {
            name,
            fail,
            at_launch: true,
            passes: passes.clone(),
        });
        (job, passes)
    }

    fn store() -> Store {
        let store = Store::temporary().unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    fn test_standard_order() {
        let jobs = JobSet::standard(store(), EventBroadcaster::new(), &Config::default());
        assert_eq!(jobs.names(), vec!["activity_monitor", "sync", "backup"]);
    }

    #[tokio::test]
    async fn test_run_pass_records_and_broadcasts() {
        let store = store();
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let (job, _) = fake_job("fake", false);

        let run = run_pass(job.as_ref(), &store, &events).await.unwrap();
        assert_eq!(run.outcome, JobRunOutcome::Success);
        assert_eq!(run.message, "fake ok");

        let started = rx.recv().await.unwrap();
        assert_eq!(
            started.event,
            UiEvent::JobStarted {
                job: "fake".to_string()
            }
        );
        let finished = rx.recv().await.unwrap();
        assert!(matches!(
            finished.event,
            UiEvent::JobFinished { outcome: JobRunOutcome::Success, .. }
        ));

        assert_eq!(store.last_run("fake").unwrap().unwrap().id, run.id);
    }

    #[tokio::test]
    async fn test_failed_pass_is_recorded() {
        let store = store();
        let (job, _) = fake_job("fake", true);

        let run = run_pass(job.as_ref(), &store, &EventBroadcaster::new())
            .await
            .unwrap();

        assert_eq!(run.outcome, JobRunOutcome::Failed);
        assert_eq!(run.message, "fake failure");
    }

    #[tokio::test]
    async fn test_run_now() {
        let (job, passes) = fake_job("fake", false);
        let jobs = JobSet::new(store(), EventBroadcaster::new()).with_job(job);

        assert!(jobs.run_now("missing").await.is_none());
        let run = jobs.run_now("fake").await.unwrap().unwrap();
        assert_eq!(run.job, "fake");
        assert_eq!(passes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_launch_order_and_handles() {
        let (first, _) = fake_job("first", false);
        let (second, _) = fake_job("second", false);
        let (third, _) = fake_job("third", false);
        let jobs = JobSet::new(store(), EventBroadcaster::new())
            .with_job(first)
            .with_job(second)
            .with_job(third);

        let handles = TaskScheduler::launch(&jobs);
        assert_eq!(handles.names(), vec!["first", "second", "third"]);

        handles.abort_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_waits_one_interval() {
        let passes = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(FakeJob {
            name: "delayed",
            fail: false,
            at_launch: false,
            passes: passes.clone(),
        });
        let jobs = JobSet::new(store(), EventBroadcaster::new()).with_job(job);

        let handles = TaskScheduler::launch(&jobs);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 1);
        handles.abort_all();
    }

    #[tokio::test]
    async fn test_heartbeats_do_not_displace_backup_history() {
        let store = store();
        let events = EventBroadcaster::new();
        let dir = tempfile::tempdir().unwrap();
        let backup = BackupTask::new(
            store.clone(),
            dir.path().to_path_buf(),
            Duration::from_secs(60),
        );
        let monitor = ActivityMonitor::new(events.clone(), Duration::from_secs(1));

        let backup_run = run_pass(&backup, &store, &events).await.unwrap();
        for _ in 0..=jellystat_core::MAX_RUNS_PER_JOB {
            run_pass(&monitor, &store, &events).await.unwrap();
        }

        let last = store.last_run("backup").unwrap().unwrap();
        assert_eq!(last.id, backup_run.id);
        assert_eq!(last.outcome, JobRunOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_keeps_its_cadence() {
        let (job, passes) = fake_job("flaky", true);
        let jobs = JobSet::new(store(), EventBroadcaster::new()).with_job(job);

        let handles = TaskScheduler::launch(&jobs);
        tokio::time::sleep(Duration::from_millis(35)).await;

        assert!(passes.load(Ordering::SeqCst) >= 3);
        assert!(!handles.all_finished());
        handles.abort_all();
    }
}
