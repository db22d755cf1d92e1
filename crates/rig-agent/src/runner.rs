//! Execution loop of one task: setup, main and teardown blocks under the stop signal.
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use rig_core::{
    Baggage, Command, CommandError, CoreError, LoggerProducer, TaskConfig, system,
};
use rig_model::{
    BlockType, CommandConf, CommandSet, CommandType, EndTaskResponse, TaskEndDetail, TaskStatus,
};

use crate::{
    agent::Agent,
    context::TaskContext,
    error::AgentError,
    heartbeat::HeartbeatTicker,
    logger::TaskLogger,
    signal::{Signal, StopSignal, StopTarget},
    timeout::{watch_deadline, watch_exec, watch_idle},
};

/// Command that failed a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockFailure {
    pub display_name: String,
    pub command_type: CommandType,
    pub reason: String,
}

impl BlockFailure {
    fn system(display_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            command_type: CommandType::System,
            reason: reason.into(),
        }
    }

    fn timed_out(block: BlockType, limit: Duration) -> Self {
        Self::system(
            block.as_str(),
            format!("block '{block}' timed out after {}s", limit.as_secs()),
        )
    }
}

#[derive(Debug)]
pub(crate) enum BlockOutcome {
    Succeeded,
    Failed(BlockFailure),
    Stopped(Signal),
}

impl Agent {
    /// Run one task to completion and report its end detail to the controller.
    pub async fn run_task(&self, tc: &TaskContext) -> Result<EndTaskResponse, AgentError> {
        let logger = Arc::new(TaskLogger::new(
            Arc::clone(&self.comm),
            tc.task().clone(),
            Arc::clone(tc.activity()),
        ));
        tc.set_logger(logger.clone());
        tc.set_trace_id(Uuid::new_v4().simple().to_string());

        let conf = match self.make_task_config(tc).await {
            Ok(conf) => conf,
            Err(e) => {
                self.fail_setup(tc, &logger, format!("initial task setup: {e}"))
                    .await;
                return Err(e);
            }
        };

        if let Err(source) = tokio::fs::create_dir_all(&conf.work_dir).await {
            let e = CoreError::Io {
                path: conf.work_dir.clone(),
                source,
            };
            self.fail_setup(tc, &logger, format!("creating working directory: {e}"))
                .await;
            return Err(e.into());
        }

        let span = conf.task_span();
        self.run_configured(tc, conf, logger).instrument(span).await
    }

    async fn fail_setup(&self, tc: &TaskContext, logger: &TaskLogger, description: String) {
        let log: &dyn LoggerProducer = logger;
        log.execution().error(&description);
        logger.send_or_warn().await;

        let detail = TaskEndDetail {
            status: TaskStatus::Failed,
            command_type: CommandType::System,
            description,
            trace_id: tc.trace_id(),
            ..Default::default()
        };
        if let Err(e) = self.comm.end_task(tc.task(), &detail).await {
            warn!(task_id = %tc.task().id, error = %e, "reporting setup failure failed");
        }
        tc.complete();
    }

    async fn run_configured(
        &self,
        tc: &TaskContext,
        conf: Arc<TaskConfig>,
        logger: Arc<TaskLogger>,
    ) -> Result<EndTaskResponse, AgentError> {
        let log: &dyn LoggerProducer = logger.as_ref();

        let mut bag = Baggage::new();
        if let Err(e) = conf.add_task_baggage(&mut bag) {
            warn!(error = %e, "task baggage is incomplete");
        }
        debug!(baggage = %bag.header_value(), "task baggage");

        self.comm.start_task(tc.task()).await?;
        tc.start();
        log.execution().info(format!(
            "Starting task {}, execution {} on agent {} ({}/{}).",
            conf.task.id,
            conf.task.execution,
            system::agent_id(),
            system::platform(),
            system::arch()
        ));

        let stop = StopSignal::new();
        let target = StopTarget::new(stop.clone());
        let background = CancellationToken::new();
        let heartbeat = self.heartbeat(tc).spawn(target.clone(), background.clone());
        let flusher = logger.spawn_flusher(background.clone());

        let group = conf.task.task_group.clone();
        let mut failure = self.run_setup(tc, &conf, &logger, &stop, &group).await;
        if failure.is_none() && !stop.is_triggered() {
            failure = self.run_main(tc, &conf, &logger, &stop).await;
        }

        let signal = stop.reason();
        if let Some(signal) = signal {
            tc.record_signal(signal);
            log.execution().warn(format!("Task stopped early: {signal}."));
        }

        // Teardown blocks get their own signal. A later abort stops them, unless the task
        // already stopped for an abort or for lost heartbeats.
        let callbacks = StopSignal::new();
        if !matches!(
            signal,
            Some(Signal::AbortedByUser | Signal::HeartbeatMaxFailed)
        ) {
            target.retarget(callbacks.clone());
        }

        if tc.had_timed_out() {
            let timeout = conf.get_task_timeout(&group).ok().flatten();
            match self
                .run_teardown_block(tc, &conf, &logger, BlockType::Timeout, timeout, &callbacks)
                .await
            {
                BlockOutcome::Succeeded => {}
                other => log
                    .execution()
                    .warn(format!("Timeout handler did not complete: {other:?}.")),
            }
        }

        let post_failure = self
            .run_post(tc, &conf, &logger, &group, &callbacks)
            .await;
        if failure.is_none() && signal.is_none() {
            failure = post_failure;
        }
        let signal = match (signal, callbacks.own_reason()) {
            (None, Some(late)) => {
                tc.record_signal(late);
                log.execution()
                    .warn(format!("Task stopped during teardown: {late}."));
                Some(late)
            }
            (signal, _) => signal,
        };

        background.cancel();
        if let Err(e) = heartbeat.await {
            warn!(error = %e, "heartbeat task panicked");
        }
        if let Err(e) = flusher.await {
            warn!(error = %e, "log flusher panicked");
        }

        let detail = self.end_detail(tc, signal, failure);
        log.execution().info(format!(
            "Task completed with status {:?}{}.",
            detail.status,
            match detail.description.as_str() {
                "" => String::new(),
                d => format!(": {d}"),
            }
        ));
        logger.send_or_warn().await;

        let resp = self.comm.end_task(tc.task(), &detail).await;
        tc.complete();
        info!(task_id = %tc.task().id, status = ?detail.status, "task ended");
        Ok(resp?)
    }

    async fn run_setup(
        &self,
        tc: &TaskContext,
        conf: &TaskConfig,
        logger: &TaskLogger,
        stop: &StopSignal,
        group: &str,
    ) -> Option<BlockFailure> {
        let log: &dyn LoggerProducer = logger;
        let setup = match conf.get_pre(group) {
            Ok(setup) => setup,
            Err(e) => return Some(BlockFailure::system("pre", e.to_string())),
        };

        if !setup.name.is_empty() && !tc.ran_setup_group() {
            tc.set_ran_setup_group(true);
            if let Some(set) = setup.setup_group {
                let limit = (setup.setup_group_timeout_secs > 0)
                    .then(|| Duration::from_secs(setup.setup_group_timeout_secs));
                let failure = match self
                    .run_block(tc, conf, logger, BlockType::SetupGroup, set.list(), stop, limit)
                    .await
                {
                    BlockOutcome::Succeeded => None,
                    BlockOutcome::Failed(f) => Some(f),
                    BlockOutcome::Stopped(Signal::BlockTimeoutExceeded) => limit
                        .map(|limit| BlockFailure::timed_out(BlockType::SetupGroup, limit)),
                    BlockOutcome::Stopped(_) => return None,
                };
                if let Some(f) = failure {
                    if setup.setup_group_can_fail_task {
                        return Some(f);
                    }
                    log.execution()
                        .warn(format!("Setup group failed, continuing: {}.", f.reason));
                }
            }
        }

        let block = if setup.name.is_empty() {
            BlockType::Pre
        } else {
            BlockType::SetupTask
        };
        if let Some(set) = setup.setup_task
            && let BlockOutcome::Failed(f) = self
                .run_block(tc, conf, logger, block, set.list(), stop, None)
                .await
        {
            if setup.setup_task_can_fail_task {
                return Some(f);
            }
            log.execution()
                .warn(format!("Block '{block}' failed, continuing: {}.", f.reason));
        }
        None
    }

    async fn run_main(
        &self,
        tc: &TaskContext,
        conf: &TaskConfig,
        logger: &TaskLogger,
        stop: &StopSignal,
    ) -> Option<BlockFailure> {
        let Some(task) = conf.project.find_project_task(&conf.task.display_name) else {
            return Some(BlockFailure::system(
                BlockType::Main.as_str(),
                format!(
                    "task '{}' is not defined in project '{}'",
                    conf.task.display_name, conf.project.identifier
                ),
            ));
        };

        let oom = tc.oom_tracker_enabled(&self.opts.cloud_provider);
        if oom && let Err(e) = tc.oom_tracker().clear().await {
            warn!(error = %e, "clearing oom tracker failed");
        }

        let started = Instant::now();
        let done = CancellationToken::new();
        let (outcome, ()) = tokio::join!(
            async {
                let outcome = self
                    .run_block(tc, conf, logger, BlockType::Main, &task.commands, stop, None)
                    .await;
                done.cancel();
                outcome
            },
            async {
                tokio::select! {
                    _ = done.cancelled() => {}
                    _ = watch_exec(tc, started, self.opts.idle_check_interval, stop) => {}
                }
            },
        );

        if oom && let Err(e) = tc.oom_tracker().check().await {
            warn!(error = %e, "checking oom tracker failed");
        }

        match outcome {
            BlockOutcome::Failed(f) => Some(f),
            BlockOutcome::Succeeded | BlockOutcome::Stopped(_) => None,
        }
    }

    async fn run_post(
        &self,
        tc: &TaskContext,
        conf: &TaskConfig,
        logger: &TaskLogger,
        group: &str,
        stop: &StopSignal,
    ) -> Option<BlockFailure> {
        let log: &dyn LoggerProducer = logger;
        let (post, can_fail) = match conf.get_post(group) {
            Ok(post) => post,
            Err(e) => {
                log.execution().warn(format!("Resolving post block: {e}."));
                return None;
            }
        };
        let block = if group.is_empty() {
            BlockType::Post
        } else {
            BlockType::TeardownTask
        };

        let failure = match self
            .run_teardown_block(tc, conf, logger, block, post, stop)
            .await
        {
            BlockOutcome::Succeeded => return None,
            BlockOutcome::Failed(f) => f,
            BlockOutcome::Stopped(Signal::BlockTimeoutExceeded) => {
                BlockFailure::timed_out(block, self.callback_timeout(conf))
            }
            BlockOutcome::Stopped(_) => return None,
        };
        if can_fail {
            return Some(failure);
        }
        log.execution()
            .warn(format!("Block '{block}' failed, ignoring: {}.", failure.reason));
        None
    }

    /// Run the task group's teardown with the context of the group's last task.
    pub(crate) async fn run_teardown_group(&self, tc: &TaskContext) {
        let Some(conf) = tc.task_config() else {
            return;
        };
        let logger = TaskLogger::new(
            Arc::clone(&self.comm),
            tc.task().clone(),
            Arc::clone(tc.activity()),
        );
        let log: &dyn LoggerProducer = &logger;

        let stop = StopSignal::new();
        let done = CancellationToken::new();
        let heartbeat = self
            .heartbeat(tc)
            .spawn(StopTarget::new(stop.clone()), done.clone());

        let group = conf.task.task_group.as_str();
        info!(task_group = %group, "running teardown group");
        match conf.get_teardown_group(group) {
            Ok(set) => {
                let outcome = self
                    .run_teardown_block(tc, &conf, &logger, BlockType::TeardownGroup, set, &stop)
                    .await;
                if !matches!(outcome, BlockOutcome::Succeeded) {
                    log.execution()
                        .warn(format!("Teardown group did not complete: {outcome:?}."));
                }
            }
            Err(e) => log.execution().warn(format!("Resolving teardown group: {e}.")),
        }
        done.cancel();
        if let Err(e) = heartbeat.await {
            warn!(error = %e, "heartbeat task panicked");
        }
        logger.send_or_warn().await;
    }

    fn heartbeat(&self, tc: &TaskContext) -> HeartbeatTicker {
        HeartbeatTicker::new(Arc::clone(&self.comm), tc.task().clone())
            .with_interval(self.opts.heartbeat_interval)
            .with_max_failed(self.opts.max_failed_heartbeats)
    }

    /// Run a block after the main phase under `stop` and the callback deadline.
    async fn run_teardown_block(
        &self,
        tc: &TaskContext,
        conf: &TaskConfig,
        logger: &TaskLogger,
        block: BlockType,
        set: Option<&CommandSet>,
        stop: &StopSignal,
    ) -> BlockOutcome {
        let Some(set) = set else {
            return BlockOutcome::Succeeded;
        };
        let limit = self.callback_timeout(conf);
        self.run_block(tc, conf, logger, block, set.list(), stop, Some(limit))
            .await
    }

    fn callback_timeout(&self, conf: &TaskConfig) -> Duration {
        match conf.project.callback_timeout_secs {
            0 => self.opts.callback_timeout,
            secs => Duration::from_secs(secs),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_block(
        &self,
        tc: &TaskContext,
        conf: &TaskConfig,
        logger: &TaskLogger,
        block: BlockType,
        commands: &[CommandConf],
        parent: &StopSignal,
        limit: Option<Duration>,
    ) -> BlockOutcome {
        if commands.is_empty() {
            return BlockOutcome::Succeeded;
        }
        let log: &dyn LoggerProducer = logger;

        let cmds = match self.registry.render_block(block, commands, &conf.project) {
            Ok(cmds) => cmds,
            Err(e) => {
                log.execution()
                    .error(format!("Rendering block '{block}': {e}."));
                return BlockOutcome::Failed(BlockFailure::system(block.as_str(), e.to_string()));
            }
        };
        log.execution()
            .info(format!("Running {} command(s) in block '{block}'.", cmds.len()));

        // Only a block with its own deadline needs its own stop signal.
        let stop = match limit {
            Some(_) => parent.child(),
            None => parent.clone(),
        };
        let done = CancellationToken::new();
        let (outcome, ()) = tokio::join!(
            async {
                let outcome = self.run_commands(tc, conf, logger, block, cmds, &stop).await;
                done.cancel();
                outcome
            },
            async {
                if let Some(limit) = limit {
                    tokio::select! {
                        _ = done.cancelled() => {}
                        _ = watch_deadline(limit, &stop) => {}
                    }
                }
            },
        );
        outcome
    }

    async fn run_commands(
        &self,
        tc: &TaskContext,
        conf: &TaskConfig,
        logger: &TaskLogger,
        block: BlockType,
        cmds: Vec<Box<dyn Command>>,
        stop: &StopSignal,
    ) -> BlockOutcome {
        let log: &dyn LoggerProducer = logger;
        let total = cmds.len();

        for (idx, cmd) in cmds.into_iter().enumerate() {
            if let Some(signal) = stop.reason() {
                return BlockOutcome::Stopped(signal);
            }
            let cmd: Arc<dyn Command> = Arc::from(cmd);
            log.execution().info(format!(
                "Running command {} (step {} of {}) in block '{block}'.",
                cmd.display_name(),
                idx + 1,
                total
            ));

            let started = Instant::now();
            let result = self
                .run_command(tc, conf, logger, block, Arc::clone(&cmd), stop)
                .await;
            logger.send_or_warn().await;

            match result {
                Ok(()) => log.execution().info(format!(
                    "Finished command {} in {:.3}s.",
                    cmd.display_name(),
                    started.elapsed().as_secs_f64()
                )),
                Err(e) => {
                    if let Some(signal) = stop.reason() {
                        log.execution()
                            .warn(format!("Command {} stopped: {signal}.", cmd.display_name()));
                        return BlockOutcome::Stopped(signal);
                    }
                    log.execution()
                        .error(format!("Command {} failed: {e}.", cmd.display_name()));
                    return BlockOutcome::Failed(BlockFailure {
                        display_name: cmd.display_name().to_string(),
                        command_type: cmd.command_type(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        BlockOutcome::Succeeded
    }

    /// Execute one command until it finishes or `stop` fires.
    ///
    /// A stopped command gets its token cancelled and `command_cleanup_grace` to return; after
    /// that its future is dropped, which kills the processes it spawned.
    async fn run_command(
        &self,
        tc: &TaskContext,
        conf: &TaskConfig,
        logger: &TaskLogger,
        block: BlockType,
        cmd: Arc<dyn Command>,
        stop: &StopSignal,
    ) -> Result<(), CommandError> {
        let log: &dyn LoggerProducer = logger;
        tc.set_current_command(Arc::clone(&cmd));
        let idle = block == BlockType::Main;
        if idle {
            tc.set_current_idle_timeout(cmd.as_ref(), block);
        }

        let saved = apply_function_vars(conf, cmd.base().function_vars());
        tc.activity().touch();

        let result = {
            let cancel = stop.command_token();
            let exec = cmd.execute(cancel.clone(), self.comm.as_ref(), log, conf);
            tokio::pin!(exec);

            let finished = tokio::select! {
                result = &mut exec => Some(result),
                _ = stop.cancelled() => None,
                _ = watch_idle(tc, self.opts.idle_check_interval, stop), if idle => None,
            };

            match finished {
                Some(result) => result,
                None => {
                    cancel.cancel();
                    match tokio::time::timeout(self.opts.command_cleanup_grace, &mut exec).await {
                        Ok(result) => result,
                        Err(_) => {
                            log.execution().warn(format!(
                                "Command {} did not stop within {}s, abandoning it.",
                                cmd.display_name(),
                                self.opts.command_cleanup_grace.as_secs_f64()
                            ));
                            Err(CommandError::Cancelled)
                        }
                    }
                }
            }
        };

        if !conf.project.unset_function_vars_disabled {
            restore_function_vars(conf, saved);
        }
        result
    }

    fn end_detail(
        &self,
        tc: &TaskContext,
        signal: Option<Signal>,
        failure: Option<BlockFailure>,
    ) -> TaskEndDetail {
        let mut detail = TaskEndDetail {
            trace_id: tc.trace_id(),
            ..TaskEndDetail::succeeded()
        };
        if tc.oom_tracker_enabled(&self.opts.cloud_provider) {
            detail.oom_tracker = tc.oom_tracker_info();
        }

        match signal {
            Some(Signal::AbortedByUser) => {
                detail.status = TaskStatus::Canceled;
                detail.description = "task aborted by user".into();
            }
            Some(Signal::HeartbeatMaxFailed) => {
                detail.status = TaskStatus::Failed;
                detail.command_type = CommandType::System;
                detail.description = "too many failed heartbeats".into();
            }
            Some(Signal::IdleTimeoutExceeded | Signal::ExecTimeoutExceeded) => {
                detail.status = TaskStatus::Failed;
                detail.timed_out = true;
                detail.timeout_type = tc.timeout_type();
                detail.timeout_duration_secs = tc.timeout_duration().as_secs();
                if let Some(kind) = detail.timeout_type {
                    detail.description = format!("{kind} timeout");
                }
                if let Some(cmd) = tc.current_command() {
                    detail.command_type = cmd.command_type();
                    detail.failing_command = cmd.display_name().to_string();
                }
            }
            Some(Signal::BlockTimeoutExceeded) | None => {
                if let Some(f) = failure {
                    detail.status = TaskStatus::Failed;
                    detail.command_type = f.command_type;
                    detail.description = f.reason;
                    detail.failing_command = f.display_name;
                }
            }
        }
        detail
    }
}

/// Set a function's vars as expansions, returning what they replaced.
fn apply_function_vars(
    conf: &TaskConfig,
    vars: &BTreeMap<String, String>,
) -> Vec<(String, Option<String>)> {
    if vars.is_empty() {
        return Vec::new();
    }
    let expanded: Vec<(String, String)> = vars
        .iter()
        .map(|(k, v)| (k.clone(), conf.expand(v).unwrap_or_else(|_| v.clone())))
        .collect();

    conf.update_expansions(|exp| {
        expanded
            .into_iter()
            .map(|(key, value)| {
                let prev = exp.get(&key).map(str::to_string);
                exp.put(key.as_str(), value);
                (key, prev)
            })
            .collect()
    })
}

fn restore_function_vars(conf: &TaskConfig, saved: Vec<(String, Option<String>)>) {
    if saved.is_empty() {
        return;
    }
    conf.update_expansions(|exp| {
        for (key, prev) in saved.into_iter().rev() {
            match prev {
                Some(value) => exp.put(key, value),
                None => {
                    exp.remove(&key);
                }
            }
        }
    });
}
