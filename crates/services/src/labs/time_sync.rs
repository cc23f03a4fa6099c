use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

use lab_core::model::LabId;
use lab_core::time::ElapsedTime;

use super::events::LabEvent;
use crate::gateway::LabGateway;

/// Background task persisting a lab's elapsed time every `period`.
///
/// Runs independently of submissions. Stopped explicitly on completion and
/// aborted when dropped.
#[derive(Debug)]
pub struct TimeSyncHandle {
    task: JoinHandle<()>,
}

impl TimeSyncHandle {
    /// Spawn the timer on the current tokio runtime.
    ///
    /// The first write happens one full `period` after spawning.
    #[must_use]
    pub fn spawn(
        gateway: Arc<dyn LabGateway>,
        lab: LabId,
        elapsed: ElapsedTime,
        period: Duration,
        events: broadcast::Sender<LabEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let seconds = elapsed.seconds();
                match gateway.update_time(lab, seconds).await {
                    Ok(()) => {
                        debug!(lab = lab.value(), seconds, "elapsed time saved");
                        let _ = events.send(LabEvent::TimeSynced(seconds));
                    }
                    Err(err) => {
                        warn!(lab = lab.value(), error = %err, "failed to save elapsed time");
                        let _ = events.send(LabEvent::TimeSyncFailed(err.to_string()));
                    }
                }
            }
        });
        Self { task }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for TimeSyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
