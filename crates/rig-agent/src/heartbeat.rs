//! Periodic liveness report to the controller.
use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rig_core::{Communicator, system};
use rig_model::TaskData;

use crate::signal::{Signal, StopTarget};

pub struct HeartbeatTicker {
    pub interval: Duration,
    pub max_failed_heartbeats: u32,
    pub comm: Arc<dyn Communicator>,
    pub task: TaskData,
}

impl HeartbeatTicker {
    pub fn new(comm: Arc<dyn Communicator>, task: TaskData) -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_failed_heartbeats: 10,
            comm,
            task,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_failed(mut self, max: u32) -> Self {
        self.max_failed_heartbeats = max;
        self
    }

    pub fn spawn(self, target: StopTarget, done: CancellationToken) -> JoinHandle<Option<Signal>> {
        tokio::spawn(self.run(target, done))
    }

    /// Heartbeat until `done` is cancelled.
    ///
    /// An abort reply triggers [`Signal::AbortedByUser`] on the target's current signal;
    /// `max_failed_heartbeats` consecutive failures trigger [`Signal::HeartbeatMaxFailed`].
    /// Heartbeats keep going after a signal so the controller knows teardown is still running.
    /// Returns the first signal this ticker raised.
    pub async fn run(self, target: StopTarget, done: CancellationToken) -> Option<Signal> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut failed = 0u32;
        let mut raised = None;
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reply = tokio::select! {
                _ = done.cancelled() => break,
                reply = self.comm.heartbeat(&self.task) => reply,
            };

            let signal = match reply {
                Ok(resp) if resp.abort => Some(Signal::AbortedByUser),
                Ok(_) => {
                    failed = 0;
                    debug!(task_id = %self.task.id, uptime = system::uptime_seconds(), "heartbeat sent");
                    None
                }
                Err(e) => {
                    failed += 1;
                    warn!(task_id = %self.task.id, failed, max = self.max_failed_heartbeats, error = %e, "heartbeat failed");
                    (failed >= self.max_failed_heartbeats).then_some(Signal::HeartbeatMaxFailed)
                }
            };

            if let Some(signal) = signal
                && target.trigger(signal)
            {
                info!(task_id = %self.task.id, %signal, "heartbeat stopped the task");
                raised.get_or_insert(signal);
            }
        }
        raised
    }
}
