//! In-memory doubles for the controller, the log pipeline and commands.
use std::{
    collections::VecDeque,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use rig_model::{
    BuildVariant, DistroView, EndTaskResponse, ExpansionVars, Expansions, HeartbeatResponse,
    LogMessage, LogSeverity, LogStream, NextTaskResponse, Patch, Project, ProjectRef, Task,
    TaskData, TaskEndDetail,
};

use crate::{
    Command, CommandBase, CommandError, CommandFactory, CommError, Communicator, CoreError,
    LoggerProducer, TaskConfig, command::decode_params,
};

/// Controller double.
///
/// `abort` and `should_fail_heartbeat` may be flipped while a heartbeat loop is running.
#[derive(Default)]
pub struct MockCommunicator {
    pub abort: AtomicBool,
    pub should_fail_heartbeat: AtomicBool,
    pub should_fail_start: AtomicBool,
    pub should_fail_end: AtomicBool,
    pub should_fail_logs: AtomicBool,
    heartbeats: AtomicUsize,
    task: Mutex<Task>,
    project: Mutex<Project>,
    project_ref: Mutex<Option<ProjectRef>>,
    expansion_vars: Mutex<ExpansionVars>,
    distro: Mutex<DistroView>,
    patch: Mutex<Patch>,
    next_tasks: Mutex<VecDeque<NextTaskResponse>>,
    end_details: Mutex<Vec<TaskEndDetail>>,
    calls: Mutex<Vec<&'static str>>,
    logs: Mutex<Vec<LogMessage>>,
}

impl MockCommunicator {
    pub fn new() -> Self {
        Self {
            project_ref: Mutex::new(Some(ProjectRef::default())),
            ..Default::default()
        }
    }

    pub fn with_task(self, task: Task) -> Self {
        *self.task.lock() = task;
        self
    }

    pub fn with_project(self, project: Project) -> Self {
        *self.project.lock() = project;
        self
    }

    pub fn with_project_ref(self, project_ref: Option<ProjectRef>) -> Self {
        *self.project_ref.lock() = project_ref;
        self
    }

    pub fn with_expansion_vars(self, vars: ExpansionVars) -> Self {
        *self.expansion_vars.lock() = vars;
        self
    }

    pub fn with_distro(self, distro: DistroView) -> Self {
        *self.distro.lock() = distro;
        self
    }

    pub fn with_patch(self, patch: Patch) -> Self {
        *self.patch.lock() = patch;
        self
    }

    pub fn set_abort(&self, abort: bool) {
        self.abort.store(abort, Ordering::SeqCst);
    }

    pub fn set_fail_heartbeat(&self, fail: bool) {
        self.should_fail_heartbeat.store(fail, Ordering::SeqCst);
    }

    /// Queue a reply for `get_next_task`. An empty queue replies `should_exit`.
    pub fn push_next_task(&self, next: NextTaskResponse) {
        self.next_tasks.lock().push_back(next);
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    /// Names of the calls received so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn end_details(&self) -> Vec<TaskEndDetail> {
        self.end_details.lock().clone()
    }

    pub fn logs(&self) -> Vec<LogMessage> {
        self.logs.lock().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Communicator for MockCommunicator {
    async fn start_task(&self, _td: &TaskData) -> Result<(), CommError> {
        self.record("start_task");
        if self.should_fail_start.load(Ordering::SeqCst) {
            return Err(CommError::Transport("failed to start".into()));
        }
        Ok(())
    }

    async fn end_task(
        &self,
        _td: &TaskData,
        detail: &TaskEndDetail,
    ) -> Result<EndTaskResponse, CommError> {
        self.record("end_task");
        if self.should_fail_end.load(Ordering::SeqCst) {
            return Err(CommError::Transport("failed to end".into()));
        }
        self.end_details.lock().push(detail.clone());
        Ok(EndTaskResponse::default())
    }

    async fn get_task(&self, _td: &TaskData) -> Result<Task, CommError> {
        self.record("get_task");
        Ok(self.task.lock().clone())
    }

    async fn get_project(&self, _td: &TaskData) -> Result<Project, CommError> {
        self.record("get_project");
        Ok(self.project.lock().clone())
    }

    async fn get_expansion_vars(&self, _td: &TaskData) -> Result<ExpansionVars, CommError> {
        self.record("get_expansion_vars");
        Ok(self.expansion_vars.lock().clone())
    }

    async fn get_project_ref(&self, _td: &TaskData) -> Result<Option<ProjectRef>, CommError> {
        self.record("get_project_ref");
        Ok(self.project_ref.lock().clone())
    }

    async fn get_distro_view(&self, _td: &TaskData) -> Result<DistroView, CommError> {
        self.record("get_distro_view");
        Ok(self.distro.lock().clone())
    }

    async fn get_task_patch(&self, _td: &TaskData, _patch_id: &str) -> Result<Patch, CommError> {
        self.record("get_task_patch");
        Ok(self.patch.lock().clone())
    }

    async fn heartbeat(&self, _td: &TaskData) -> Result<HeartbeatResponse, CommError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.should_fail_heartbeat.load(Ordering::SeqCst) {
            return Err(CommError::Transport("failed to heartbeat".into()));
        }
        Ok(HeartbeatResponse {
            abort: self.abort.load(Ordering::SeqCst),
        })
    }

    async fn get_next_task(&self) -> Result<NextTaskResponse, CommError> {
        self.record("get_next_task");
        Ok(self
            .next_tasks
            .lock()
            .pop_front()
            .unwrap_or_else(|| NextTaskResponse {
                should_exit: true,
                ..Default::default()
            }))
    }

    async fn send_log_messages(
        &self,
        _td: &TaskData,
        msgs: &[LogMessage],
    ) -> Result<(), CommError> {
        if self.should_fail_logs.load(Ordering::SeqCst) {
            return Err(CommError::Transport("failed to send logs".into()));
        }
        self.logs.lock().extend_from_slice(msgs);
        Ok(())
    }
}

/// Logger that keeps every message in memory.
#[derive(Default)]
pub struct MemoryLogger {
    messages: Mutex<Vec<LogMessage>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<LogMessage> {
        self.messages.lock().clone()
    }

    /// Messages of `stream`, in order.
    pub fn lines(&self, stream: LogStream) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.stream == stream)
            .map(|m| m.message.clone())
            .collect()
    }

    pub fn contains(&self, stream: LogStream, needle: &str) -> bool {
        self.messages
            .lock()
            .iter()
            .any(|m| m.stream == stream && m.message.contains(needle))
    }
}

impl LoggerProducer for MemoryLogger {
    fn emit(&self, stream: LogStream, severity: LogSeverity, message: &str) {
        self.messages
            .lock()
            .push(LogMessage::now(stream, severity, message));
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MockParams {
    script: String,
    /// Lines written to the task log.
    lines: Vec<String>,
    sleep_ms: u64,
    /// Keep sleeping after cancellation.
    ignore_cancel: bool,
    fail: bool,
    fail_parse: bool,
}

/// Command double registered as `command.mock`.
///
/// Logs `executing <display name>` on the task stream, then follows its params.
#[derive(Debug, Default)]
pub struct MockCommand {
    base: CommandBase,
    params: MockParams,
}

impl MockCommand {
    pub const NAME: &'static str = "command.mock";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory() -> CommandFactory {
        Arc::new(|| Box::new(MockCommand::new()) as Box<dyn Command>)
    }
}

#[async_trait]
impl Command for MockCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CommandBase {
        &mut self.base
    }

    fn parse_params(&mut self, params: &Map<String, Value>) -> Result<(), CoreError> {
        let params: MockParams = decode_params(Self::NAME, params)?;
        if params.fail_parse {
            return Err(CoreError::ParamDecode {
                command: Self::NAME.to_string(),
                reason: "fail_parse is set".into(),
            });
        }
        self.params = params;
        Ok(())
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _comm: &dyn Communicator,
        logger: &dyn LoggerProducer,
        _conf: &TaskConfig,
    ) -> Result<(), CommandError> {
        logger.task().info(format!("executing {}", self.display_name()));
        for line in &self.params.lines {
            logger.task().info(line);
        }

        if self.params.sleep_ms > 0 {
            let sleep = tokio::time::sleep(Duration::from_millis(self.params.sleep_ms));
            if self.params.ignore_cancel {
                sleep.await;
            } else {
                tokio::select! {
                    _ = sleep => {}
                    _ = cancel.cancelled() => return Err(CommandError::Cancelled),
                }
            }
        }

        if self.params.fail {
            return Err(CommandError::failed("mock command failed"));
        }
        Ok(())
    }
}

/// Config for a task `t1` of version `v1` on build variant `bv`, rooted at `work_dir`.
pub fn task_config(work_dir: &Path, mut project: Project) -> TaskConfig {
    if project.find_build_variant("bv").is_none() {
        project.build_variants.push(BuildVariant {
            name: "bv".into(),
            ..Default::default()
        });
    }
    let task = Task {
        id: "t1".into(),
        display_name: "mock_task".into(),
        version: "v1".into(),
        build_variant: "bv".into(),
        ..Default::default()
    };
    match TaskConfig::new(
        work_dir,
        None,
        Some(project),
        task,
        Some(ProjectRef::default()),
        None,
        Expansions::new(),
    ) {
        Ok(conf) => conf,
        Err(e) => panic!("mock task config: {e}"),
    }
}
