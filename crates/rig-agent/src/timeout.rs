//! Idle, exec and block deadlines of a task run.
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use rig_model::TimeoutType;

use crate::{
    context::TaskContext,
    signal::{Signal, StopSignal},
};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Time of the last output observed from the running command.
#[derive(Debug)]
pub struct ActivityClock {
    last: Mutex<Instant>,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }
}

impl ActivityClock {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

/// Fire [`Signal::IdleTimeoutExceeded`] once the running command has been silent for longer
/// than the context's current idle timeout. Returns when `stop` is triggered by anyone.
pub async fn watch_idle(tc: &TaskContext, check: Duration, stop: &StopSignal) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(check) => {}
        }

        let limit = tc.current_idle_timeout();
        if tc.activity().idle_for() >= limit {
            debug!(target: "rig.agent.timeout", limit_ms = limit.as_millis() as u64, "idle timeout reached");
            stop.trigger_with(Signal::IdleTimeoutExceeded, || {
                tc.reach_time_out(TimeoutType::Idle, limit)
            });
            return;
        }
    }
}

/// Fire [`Signal::ExecTimeoutExceeded`] once `started` is older than the context's exec
/// timeout. The limit is re-read on every check, so dynamic updates apply.
pub async fn watch_exec(tc: &TaskContext, started: Instant, check: Duration, stop: &StopSignal) {
    loop {
        let limit = tc.exec_timeout();
        if started.elapsed() >= limit {
            debug!(target: "rig.agent.timeout", limit_secs = limit.as_secs(), "exec timeout reached");
            stop.trigger_with(Signal::ExecTimeoutExceeded, || {
                tc.reach_time_out(TimeoutType::Exec, limit)
            });
            return;
        }

        let wait = check.min(limit.saturating_sub(started.elapsed()));
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Fire [`Signal::BlockTimeoutExceeded`] on `stop` after `limit`.
pub async fn watch_deadline(limit: Duration, stop: &StopSignal) {
    tokio::select! {
        _ = stop.cancelled() => {}
        _ = tokio::time::sleep(limit) => {
            stop.trigger(Signal::BlockTimeoutExceeded);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use rig_core::mock::task_config;
    use rig_model::{Project, TaskData};

    use super::*;

    fn context() -> (TaskContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            identifier: "demo".into(),
            ..Default::default()
        };
        let tc = TaskContext::new(TaskData::new("t1", "secret"));
        tc.set_task_config(Arc::new(task_config(dir.path(), project)));
        (tc, dir)
    }

    #[tokio::test]
    async fn idle_watch_fires_when_silent() {
        let (tc, _dir) = context();
        tc.set_idle_timeout(Duration::from_millis(50));
        let stop = StopSignal::new();

        watch_idle(&tc, Duration::from_millis(10), &stop).await;

        assert_eq!(stop.reason(), Some(Signal::IdleTimeoutExceeded));
        assert!(tc.had_timed_out());
        assert_eq!(tc.timeout_type(), Some(TimeoutType::Idle));
        assert_eq!(tc.timeout_duration(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn idle_watch_is_reset_by_activity() {
        let (tc, _dir) = context();
        tc.set_idle_timeout(Duration::from_millis(80));
        let stop = StopSignal::new();

        let toucher = async {
            for _ in 0..10 {
                tc.activity().touch();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            stop.trigger(Signal::AbortedByUser);
        };
        tokio::join!(watch_idle(&tc, Duration::from_millis(10), &stop), toucher);

        assert_eq!(stop.reason(), Some(Signal::AbortedByUser));
        assert!(!tc.had_timed_out());
    }

    #[tokio::test]
    async fn exec_watch_reads_dynamic_limit() {
        let (tc, _dir) = context();
        tc.task_config().unwrap().set_exec_timeout(Duration::from_millis(60));
        let stop = StopSignal::new();

        let started = Instant::now();
        watch_exec(&tc, started, Duration::from_millis(10), &stop).await;

        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(stop.reason(), Some(Signal::ExecTimeoutExceeded));
        assert_eq!(tc.timeout_type(), Some(TimeoutType::Exec));
    }

    #[tokio::test]
    async fn watchers_yield_to_earlier_stop() {
        let (tc, _dir) = context();
        let stop = StopSignal::new();
        stop.trigger(Signal::HeartbeatMaxFailed);

        watch_exec(&tc, Instant::now(), Duration::from_millis(10), &stop).await;
        watch_deadline(Duration::from_secs(60), &stop).await;

        assert_eq!(stop.reason(), Some(Signal::HeartbeatMaxFailed));
        assert!(!tc.had_timed_out());
    }
}
