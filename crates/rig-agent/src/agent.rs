use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use rig_core::{CommandRegistry, Communicator, TaskConfig, system};
use rig_model::{NextTaskResponse, requester};

use crate::{
    context::TaskContext,
    error::AgentError,
    oom::{DmesgOomTracker, NoopOomTracker, OomTracker},
    options::{AgentOptions, Mode},
};

/// Polls the controller for tasks and runs them one at a time.
pub struct Agent {
    pub(crate) opts: AgentOptions,
    pub(crate) comm: Arc<dyn Communicator>,
    pub(crate) registry: Arc<CommandRegistry>,
    oom: Arc<dyn OomTracker>,
}

impl Agent {
    pub fn new(
        opts: AgentOptions,
        comm: Arc<dyn Communicator>,
        registry: Arc<CommandRegistry>,
    ) -> Self {
        let oom: Arc<dyn OomTracker> = if cfg!(target_os = "linux") && opts.mode == Mode::Host {
            Arc::new(DmesgOomTracker::new())
        } else {
            Arc::new(NoopOomTracker)
        };
        Self {
            opts,
            comm,
            registry,
            oom,
        }
    }

    pub fn with_oom_tracker(mut self, oom: Arc<dyn OomTracker>) -> Self {
        self.oom = oom;
        self
    }

    #[inline]
    pub fn options(&self) -> &AgentOptions {
        &self.opts
    }

    /// Run tasks until the controller asks the agent to exit or `shutdown` is cancelled.
    ///
    /// Consecutive tasks of one task group share the group's setup; the group's teardown runs
    /// when the next task belongs elsewhere and on exit.
    pub async fn run(&self, shutdown: CancellationToken) {
        system::init_uptime();
        info!(agent_id = %system::agent_id(), host_id = %self.opts.host_id, mode = %self.opts.mode, "agent started");

        let mut group: Option<TaskContext> = None;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.comm.get_next_task() => next,
            };
            let next = match next {
                Ok(next) => next,
                Err(e) => {
                    warn!(error = %e, "getting next task failed");
                    if self.pause(&shutdown).await {
                        continue;
                    }
                    break;
                }
            };

            if next.should_exit {
                info!("controller asked the agent to exit");
                break;
            }
            if !next.has_task() {
                debug!("no task assigned");
                if self.pause(&shutdown).await {
                    continue;
                }
                break;
            }

            if let Some(prev) = group.take_if(|prev| leaves_group(prev, &next)) {
                self.run_teardown_group(&prev).await;
            }

            let tc = TaskContext::new(next.task_data()).with_oom_tracker(Arc::clone(&self.oom));
            if let Some(prev) = &group {
                tc.set_ran_setup_group(prev.ran_setup_group());
            }

            let mut exit = false;
            match self.run_task(&tc).await {
                Ok(resp) => exit = resp.should_exit,
                Err(e) => warn!(task_id = %next.task_id, error = %e, "task run failed"),
            }

            let in_group = tc
                .task_config()
                .is_some_and(|conf| conf.task.in_task_group());
            group = in_group.then_some(tc);

            if exit {
                info!("controller asked the agent to exit after the task");
                break;
            }
        }

        if let Some(prev) = group.take() {
            self.run_teardown_group(&prev).await;
        }
        info!(uptime = system::uptime_seconds(), "agent stopped");
    }

    /// Sleep between polls. Returns `false` when shutdown was requested meanwhile.
    async fn pause(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.opts.next_task_interval) => true,
        }
    }

    /// Fetch everything the task needs and attach the resulting config to `tc`.
    ///
    /// A config already attached to `tc` is returned as is.
    #[instrument(level = "debug", skip_all, fields(task_id = %tc.task().id))]
    pub async fn make_task_config(&self, tc: &TaskContext) -> Result<Arc<TaskConfig>, AgentError> {
        if let Some(conf) = tc.task_config()
            && !conf.project.identifier.is_empty()
        {
            return Ok(conf);
        }
        let td = tc.task();

        info!("Fetching project config.");
        let task = self.comm.get_task(td).await?;
        let project = self.comm.get_project(td).await?;
        let vars = self.comm.get_expansion_vars(td).await?;

        let distro = match self.opts.mode {
            Mode::Host => {
                info!("Fetching distro configuration.");
                Some(self.comm.get_distro_view(td).await?)
            }
            Mode::Pod => None,
        };

        info!("Fetching project ref.");
        let project_ref = self
            .comm
            .get_project_ref(td)
            .await?
            .ok_or(AgentError::EmptyProjectRef)?;

        let patch = if requester::is_github_patch_requester(&task.requester) {
            info!("Fetching patch document for GitHub request.");
            Some(self.comm.get_task_patch(td, "").await?)
        } else {
            None
        };

        info!("Constructing task config.");
        let group = task.task_group.clone();
        let mut conf = TaskConfig::new(
            &self.opts.working_directory,
            distro,
            Some(project),
            task,
            Some(project_ref),
            patch.as_ref(),
            vars.resolve(),
        )?;
        conf.redacted = vars.redacted_keys().into_iter().collect();
        conf.task_sync = self.opts.task_sync.clone();
        conf.ec2_keys = self.opts.ec2_keys.clone();

        if !group.is_empty() {
            let tg = conf.project.find_task_group(&group).cloned().ok_or_else(|| {
                AgentError::Programmatic(format!(
                    "task group '{group}' is missing from project '{}'",
                    conf.project.identifier
                ))
            })?;
            conf.task_group = Some(tg);
        }

        let conf = Arc::new(conf);
        tc.set_task_config(Arc::clone(&conf));
        Ok(conf)
    }
}

fn leaves_group(prev: &TaskContext, next: &NextTaskResponse) -> bool {
    let prev_group = prev
        .task_config()
        .map(|conf| conf.task.task_group.clone())
        .unwrap_or_default();
    next.task_group.is_empty() || next.task_group != prev_group
}
