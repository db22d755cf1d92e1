mod attributes;
pub use attributes::attr;

use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use parking_lot::RwLock;

use rig_model::{
    BuildVariant, CLONE_METHOD_OAUTH, CommandSet, DistroView, Ec2Key, Expansions, GithubMergeGroup,
    GithubPatch, ModelError, Patch, Project, ProjectRef, S3Credentials, Task, TaskGroup,
};

use crate::CoreError;

/// Task-level timeout overrides. Zero means "not overridden".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeout {
    pub idle: Duration,
    pub exec: Duration,
}

/// Setup commands that run before a task's main block.
#[derive(Debug, Clone, Copy)]
pub struct TaskSetup<'a> {
    /// Task group name, empty outside a group.
    pub name: &'a str,
    pub setup_group: Option<&'a CommandSet>,
    pub setup_group_can_fail_task: bool,
    pub setup_group_timeout_secs: u64,
    pub setup_task: Option<&'a CommandSet>,
    pub setup_task_can_fail_task: bool,
}

/// Everything a task run needs, fetched once from the controller.
///
/// Fields are fixed after construction except the timeout overrides and the expansions,
/// which commands may change while the task runs.
#[derive(Debug)]
pub struct TaskConfig {
    pub distro: Option<DistroView>,
    pub project_ref: ProjectRef,
    pub project: Project,
    pub task: Task,
    pub build_variant: BuildVariant,
    expansions: RwLock<Expansions>,
    /// Expansion keys whose values are masked in logs.
    pub redacted: BTreeSet<String>,
    pub work_dir: PathBuf,
    pub github_patch: GithubPatch,
    pub github_merge: GithubMergeGroup,
    timeout: RwLock<Timeout>,
    pub task_sync: S3Credentials,
    pub ec2_keys: Vec<Ec2Key>,
    pub module_paths: BTreeMap<String, PathBuf>,
    pub task_group: Option<TaskGroup>,
}

impl TaskConfig {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        distro: Option<DistroView>,
        project: Option<Project>,
        task: Task,
        project_ref: Option<ProjectRef>,
        patch: Option<&Patch>,
        expansions: Expansions,
    ) -> Result<Self, CoreError> {
        let project = project.ok_or_else(|| {
            CoreError::InvalidInput(format!("project '{}' is missing", task.project))
        })?;
        let project_ref = project_ref.ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "project ref '{}' is missing",
                project.identifier
            ))
        })?;
        let build_variant = project
            .find_build_variant(&task.build_variant)
            .cloned()
            .ok_or_else(|| {
                CoreError::InvalidInput(format!(
                    "cannot find build variant '{}' for task in project '{}'",
                    task.build_variant, task.project
                ))
            })?;

        let (github_patch, github_merge) = patch
            .map(|p| (p.github_patch_data.clone(), p.github_merge_data.clone()))
            .unwrap_or_default();

        Ok(Self {
            distro,
            project_ref,
            project,
            task,
            build_variant,
            expansions: RwLock::new(expansions),
            redacted: BTreeSet::new(),
            work_dir: work_dir.into(),
            github_patch,
            github_merge,
            timeout: RwLock::new(Timeout::default()),
            task_sync: S3Credentials::default(),
            ec2_keys: Vec::new(),
            module_paths: BTreeMap::new(),
            task_group: None,
        })
    }

    /// Unwrap an optional config, reporting its absence as invalid state.
    pub fn require(conf: Option<&TaskConfig>) -> Result<&TaskConfig, CoreError> {
        conf.ok_or_else(|| CoreError::InvalidState("task config is missing".into()))
    }

    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.timeout.write().idle = timeout;
    }

    pub fn idle_timeout(&self) -> Duration {
        self.timeout.read().idle
    }

    pub fn set_exec_timeout(&self, timeout: Duration) {
        self.timeout.write().exec = timeout;
    }

    pub fn exec_timeout(&self) -> Duration {
        self.timeout.read().exec
    }

    pub fn timeout(&self) -> Timeout {
        *self.timeout.read()
    }

    /// Snapshot of the current expansions.
    pub fn expansions(&self) -> Expansions {
        self.expansions.read().clone()
    }

    pub fn set_expansions(&self, expansions: Expansions) {
        *self.expansions.write() = expansions;
    }

    pub fn update_expansions<R>(&self, f: impl FnOnce(&mut Expansions) -> R) -> R {
        f(&mut self.expansions.write())
    }

    pub fn expand(&self, input: &str) -> Result<String, ModelError> {
        self.expansions.read().expand(input)
    }

    /// Replace values of redacted expansions in `text`.
    pub fn redact(&self, text: &str) -> String {
        let exp = self.expansions.read();
        let mut out = text.to_string();
        for key in &self.redacted {
            if let Some(value) = exp.get(key).filter(|v| !v.is_empty()) {
                out = out.replace(value, &format!("<REDACTED:{key}>"));
            }
        }
        out
    }

    /// Resolve `dir` against the task's working directory and check it is an existing directory.
    ///
    /// Empty input yields the root; input already under the root is kept as is.
    pub fn get_working_directory(&self, dir: &str) -> Result<PathBuf, CoreError> {
        let path = if dir.is_empty() {
            self.work_dir.clone()
        } else if Path::new(dir).starts_with(&self.work_dir) {
            PathBuf::from(dir)
        } else {
            self.work_dir.join(dir.trim_start_matches('/'))
        };

        match fs::metadata(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CoreError::NotExist(path)),
            Err(source) => Err(CoreError::Io { path, source }),
            Ok(meta) if !meta.is_dir() => Err(CoreError::NotADirectory(path)),
            Ok(_) => Ok(path),
        }
    }

    pub fn clone_method(&self) -> &str {
        match &self.distro {
            Some(d) => &d.clone_method,
            None => CLONE_METHOD_OAUTH,
        }
    }

    pub fn get_share_procs(&self, group: &str) -> Result<bool, CoreError> {
        self.validate()?;
        Ok(self.find_group(group)?.share_processes)
    }

    /// Setup blocks for `group`; outside a group the project `pre` block is the setup task.
    pub fn get_pre(&self, group: &str) -> Result<TaskSetup<'_>, CoreError> {
        self.validate()?;
        if group.is_empty() {
            return Ok(TaskSetup {
                name: "",
                setup_group: None,
                setup_group_can_fail_task: false,
                setup_group_timeout_secs: 0,
                setup_task: self.project.pre.as_ref(),
                setup_task_can_fail_task: self.project.pre_error_fails_task,
            });
        }

        let tg = self.find_group(group)?;
        Ok(TaskSetup {
            name: &tg.name,
            setup_group: tg.setup_group.as_ref(),
            setup_group_can_fail_task: tg.setup_group_can_fail_task,
            setup_group_timeout_secs: tg.setup_group_timeout_secs,
            setup_task: tg.setup_task.as_ref(),
            setup_task_can_fail_task: tg.setup_task_can_fail_task,
        })
    }

    /// Teardown-task block for `group` and whether its failure fails the task.
    pub fn get_post(&self, group: &str) -> Result<(Option<&CommandSet>, bool), CoreError> {
        self.validate()?;
        if group.is_empty() {
            let post = self.project.post.as_ref();
            return Ok((post, post.is_none() || self.project.post_error_fails_task));
        }

        let tg = self.find_group(group)?;
        Ok((tg.teardown_task.as_ref(), tg.teardown_task_can_fail_task))
    }

    /// Timeout handler block: the group's own when it declares one, otherwise the project's.
    pub fn get_task_timeout(&self, group: &str) -> Result<Option<&CommandSet>, CoreError> {
        self.validate()?;
        let own = match group {
            "" => None,
            group => self.find_group(group)?.timeout.as_ref(),
        };
        Ok(own.or(self.project.timeout.as_ref()))
    }

    pub fn get_teardown_group(&self, group: &str) -> Result<Option<&CommandSet>, CoreError> {
        self.validate()?;
        if group.is_empty() {
            return Err(CoreError::InvalidArgument("task group name is empty".into()));
        }
        Ok(self.find_group(group)?.teardown_group.as_ref())
    }

    fn find_group(&self, group: &str) -> Result<&TaskGroup, CoreError> {
        self.project.find_task_group(group).ok_or_else(|| {
            CoreError::NotFound(format!(
                "task group '{group}' in project '{}'",
                self.project.identifier
            ))
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.task.version.is_empty() {
            return Err(CoreError::InvalidState(format!(
                "task '{}' has no version",
                self.task.id
            )));
        }
        Ok(())
    }
}
