//! Per-run state shared by the execution loop, the watchdogs and the heartbeat.
use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;

use rig_core::{Command, LoggerProducer, TaskConfig};
use rig_model::{BlockType, OomTrackerInfo, TaskData, TimeoutType};

use crate::{
    oom::{NoopOomTracker, OomTracker},
    signal::Signal,
    timeout::{ActivityClock, DEFAULT_EXEC_TIMEOUT, DEFAULT_IDLE_TIMEOUT},
};

/// Cloud providers backed by containers, where kernel OOM messages are not visible.
pub const CONTAINER_PROVIDERS: &[&str] = &["docker", "docker-mock"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    NotStarted,
    Running,
    TimedOut,
    Aborted,
    HeartbeatFailed,
    Completed,
}

/// Timeout bookkeeping. Once a timeout is reached it stays recorded for the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutInfo {
    pub idle_timeout: Duration,
    pub had_timeout: bool,
    pub timeout_type: Option<TimeoutType>,
    pub exceeded: Duration,
}

#[derive(Default)]
struct Inner {
    state: RunState,
    current_command: Option<Arc<dyn Command>>,
    logger: Option<Arc<dyn LoggerProducer>>,
    ran_setup_group: bool,
    task_config: Option<Arc<TaskConfig>>,
    timeout: TimeoutInfo,
    trace_id: String,
}

/// State of one task run attempt. A fresh context is built for every attempt.
pub struct TaskContext {
    task: TaskData,
    inner: RwLock<Inner>,
    oom: Arc<dyn OomTracker>,
    activity: Arc<ActivityClock>,
}

impl TaskContext {
    pub fn new(task: TaskData) -> Self {
        Self {
            task,
            inner: RwLock::new(Inner::default()),
            oom: Arc::new(NoopOomTracker),
            activity: Arc::new(ActivityClock::new()),
        }
    }

    pub fn with_oom_tracker(mut self, oom: Arc<dyn OomTracker>) -> Self {
        self.oom = oom;
        self
    }

    #[inline]
    pub fn task(&self) -> &TaskData {
        &self.task
    }

    #[inline]
    pub fn activity(&self) -> &Arc<ActivityClock> {
        &self.activity
    }

    #[inline]
    pub fn oom_tracker(&self) -> &Arc<dyn OomTracker> {
        &self.oom
    }

    pub fn state(&self) -> RunState {
        self.inner.read().state
    }

    pub fn set_logger(&self, logger: Arc<dyn LoggerProducer>) {
        self.inner.write().logger = Some(logger);
    }

    pub fn logger(&self) -> Option<Arc<dyn LoggerProducer>> {
        self.inner.read().logger.clone()
    }

    pub fn set_task_config(&self, conf: Arc<TaskConfig>) {
        self.inner.write().task_config = Some(conf);
    }

    pub fn task_config(&self) -> Option<Arc<TaskConfig>> {
        self.inner.read().task_config.clone()
    }

    pub fn ran_setup_group(&self) -> bool {
        self.inner.read().ran_setup_group
    }

    pub fn set_ran_setup_group(&self, ran: bool) {
        self.inner.write().ran_setup_group = ran;
    }

    pub fn trace_id(&self) -> String {
        self.inner.read().trace_id.clone()
    }

    pub fn set_trace_id(&self, trace_id: impl Into<String>) {
        self.inner.write().trace_id = trace_id.into();
    }

    /// `NotStarted -> Running`; no effect in any other state.
    pub fn start(&self) {
        let mut inner = self.inner.write();
        if inner.state == RunState::NotStarted {
            inner.state = RunState::Running;
        }
    }

    /// Terminal transition.
    pub fn complete(&self) {
        self.inner.write().state = RunState::Completed;
    }

    /// Record the stop signal observed by the execution loop.
    pub fn record_signal(&self, signal: Signal) {
        let mut inner = self.inner.write();
        if matches!(inner.state, RunState::NotStarted | RunState::Running) {
            inner.state = match signal {
                Signal::AbortedByUser => RunState::Aborted,
                Signal::HeartbeatMaxFailed => RunState::HeartbeatFailed,
                Signal::IdleTimeoutExceeded | Signal::ExecTimeoutExceeded => RunState::TimedOut,
                Signal::BlockTimeoutExceeded => inner.state,
            };
        }
    }

    pub fn set_current_command(&self, cmd: Arc<dyn Command>) {
        let line = format!(
            "Current command set to {} ({}).",
            cmd.display_name(),
            cmd.command_type()
        );
        let logger = {
            let mut inner = self.inner.write();
            inner.current_command = Some(cmd);
            if inner.state == RunState::NotStarted {
                inner.state = RunState::Running;
            }
            inner.logger.clone()
        };
        if let Some(logger) = logger {
            logger.execution().info(line);
        }
    }

    pub fn current_command(&self) -> Option<Arc<dyn Command>> {
        self.inner.read().current_command.clone()
    }

    /// Resolve the idle timeout for `cmd`: a task-level override beats the command's own
    /// timeout, which beats [`DEFAULT_IDLE_TIMEOUT`].
    pub fn set_current_idle_timeout(&self, cmd: &dyn Command, block: BlockType) {
        let dynamic = self
            .task_config()
            .map(|conf| conf.idle_timeout())
            .unwrap_or_default();
        let timeout = if !dynamic.is_zero() {
            dynamic
        } else {
            cmd.idle_timeout()
                .filter(|t| !t.is_zero())
                .unwrap_or(DEFAULT_IDLE_TIMEOUT)
        };

        let logger = {
            let mut inner = self.inner.write();
            inner.timeout.idle_timeout = timeout;
            inner.logger.clone()
        };
        if let Some(logger) = logger {
            logger.execution().debug(format!(
                "Set idle timeout for {} ({}) in block '{block}' to {}s.",
                cmd.display_name(),
                cmd.command_type(),
                timeout.as_secs_f64()
            ));
        }
    }

    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.inner.write().timeout.idle_timeout = timeout;
    }

    /// Idle timeout of the running command; never zero.
    pub fn current_idle_timeout(&self) -> Duration {
        match self.inner.read().timeout.idle_timeout {
            t if t.is_zero() => DEFAULT_IDLE_TIMEOUT,
            t => t,
        }
    }

    pub fn reach_time_out(&self, kind: TimeoutType, duration: Duration) {
        let mut inner = self.inner.write();
        inner.timeout.had_timeout = true;
        inner.timeout.timeout_type = Some(kind);
        inner.timeout.exceeded = duration;
        if matches!(inner.state, RunState::NotStarted | RunState::Running) {
            inner.state = RunState::TimedOut;
        }
    }

    pub fn had_timed_out(&self) -> bool {
        self.inner.read().timeout.had_timeout
    }

    pub fn timeout_type(&self) -> Option<TimeoutType> {
        self.inner.read().timeout.timeout_type
    }

    pub fn timeout_duration(&self) -> Duration {
        self.inner.read().timeout.exceeded
    }

    pub fn timeout_info(&self) -> TimeoutInfo {
        self.inner.read().timeout
    }

    /// `None` unless the tracker saw OOM kills during the last check.
    pub fn oom_tracker_info(&self) -> Option<OomTrackerInfo> {
        let (lines, pids) = self.oom.report();
        if lines.is_empty() {
            return None;
        }
        Some(OomTrackerInfo {
            detected: true,
            pids,
        })
    }

    pub fn oom_tracker_enabled(&self, cloud_provider: &str) -> bool {
        let Some(conf) = self.task_config() else {
            return false;
        };
        conf.project.oom_tracker && !CONTAINER_PROVIDERS.contains(&cloud_provider)
    }

    /// Exec timeout: task-level override, then the project task's, then the project's, then
    /// [`DEFAULT_EXEC_TIMEOUT`]. Works before any config is attached.
    pub fn exec_timeout(&self) -> Duration {
        let inner = self.inner.read();
        let Some(conf) = inner.task_config.as_deref() else {
            return DEFAULT_EXEC_TIMEOUT;
        };

        let dynamic = conf.exec_timeout();
        if !dynamic.is_zero() {
            return dynamic;
        }
        if let Some(pt) = conf.project.find_project_task(&conf.task.display_name)
            && pt.exec_timeout_secs > 0
        {
            return Duration::from_secs(pt.exec_timeout_secs);
        }
        if conf.project.exec_timeout_secs > 0 {
            return Duration::from_secs(conf.project.exec_timeout_secs);
        }
        DEFAULT_EXEC_TIMEOUT
    }
}
