mod block;
pub use block::BlockType;

mod command;
pub use command::{CommandConf, CommandType};

mod set;
pub use set::CommandSet;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Declarative project definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub identifier: String,
    /// Default type of every command that does not declare one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_type: Option<CommandType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre: Option<CommandSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<CommandSet>,
    /// Commands run when a task hits its idle or exec timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<CommandSet>,
    pub functions: BTreeMap<String, CommandSet>,
    pub tasks: Vec<ProjectTask>,
    #[serde(rename = "buildvariants")]
    pub build_variants: Vec<BuildVariant>,
    pub task_groups: Vec<TaskGroup>,
    pub exec_timeout_secs: u64,
    pub callback_timeout_secs: u64,
    pub pre_error_fails_task: bool,
    pub post_error_fails_task: bool,
    pub oom_tracker: bool,
    pub unset_function_vars_disabled: bool,
}

impl Project {
    pub fn from_yaml(input: &str) -> Result<Self, ModelError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn find_build_variant(&self, name: &str) -> Option<&BuildVariant> {
        self.build_variants.iter().find(|bv| bv.name == name)
    }

    pub fn find_project_task(&self, name: &str) -> Option<&ProjectTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn find_task_group(&self, name: &str) -> Option<&TaskGroup> {
        self.task_groups.iter().find(|tg| tg.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&CommandSet> {
        self.functions.get(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectTask {
    pub name: String,
    pub commands: Vec<CommandConf>,
    pub exec_timeout_secs: u64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildVariant {
    pub name: String,
    pub display_name: String,
    pub expansions: BTreeMap<String, String>,
    pub run_on: Vec<String>,
}

/// Cluster of tasks sharing setup and teardown commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskGroup {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_group: Option<CommandSet>,
    pub setup_group_can_fail_task: bool,
    pub setup_group_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_task: Option<CommandSet>,
    pub setup_task_can_fail_task: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_task: Option<CommandSet>,
    pub teardown_task_can_fail_task: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_group: Option<CommandSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<CommandSet>,
    pub tasks: Vec<String>,
    /// Keep processes started by one task alive for the next task of the group.
    pub share_processes: bool,
    pub max_hosts: u32,
}
