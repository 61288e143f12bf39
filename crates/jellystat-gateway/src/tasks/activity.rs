//! Activity monitor.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{BackgroundJob, JobError, JobReport};
use crate::events::{EventBroadcaster, UiEvent};

/// Polls for live activity and keeps connected clients alive with a heartbeat.
///
/// Session polling against the media server happens outside this crate; the
/// pass here publishes the heartbeat and reports how many clients listen.
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    events: EventBroadcaster,
    interval: Duration,
}

impl ActivityMonitor {
    /// Create the monitor.
    #[must_use]
    pub const fn new(events: EventBroadcaster, interval: Duration) -> Self {
        Self { events, interval }
    }
}

#[async_trait]
impl BackgroundJob for ActivityMonitor {
    fn name(&self) -> &'static str {
        "activity_monitor"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<JobReport, JobError> {
        let clients = self.events.broadcast(UiEvent::Heartbeat {
            timestamp: Utc::now(),
        });
        Ok(JobReport::new(format!("{clients} client(s) connected")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heartbeat_reaches_subscribers() {
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let monitor = ActivityMonitor::new(events, Duration::from_secs(1));

        let report = monitor.run_once().await.unwrap();
        assert_eq!(report.message, "1 client(s) connected");
        assert!(matches!(rx.recv().await.unwrap().event, UiEvent::Heartbeat { .. }));
    }
}
