mod task_status;
pub use task_status::TaskStatus;

mod task_end;
pub use task_end::{EndTaskResponse, OomTrackerInfo, TaskEndDetail, TimeoutType};

mod log_message;
pub use log_message::{LogMessage, LogSeverity, LogStream};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Expansions;

/// Identity of the task currently assigned to the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskData {
    pub id: String,
    pub secret: String,
}

impl TaskData {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

/// Controller reply to a request for work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NextTaskResponse {
    pub task_id: String,
    pub task_secret: String,
    pub task_group: String,
    pub build_variant: String,
    pub version: String,
    pub should_exit: bool,
}

impl NextTaskResponse {
    #[inline]
    pub fn has_task(&self) -> bool {
        !self.task_id.is_empty()
    }

    pub fn task_data(&self) -> TaskData {
        TaskData::new(&self.task_id, &self.task_secret)
    }
}

/// Liveness acknowledgement. `abort` is set when a user asked to stop the task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatResponse {
    pub abort: bool,
}

/// Expansions and project variables resolved for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionVars {
    /// Controller-computed expansions (task id, revision, build variant...).
    pub expansions: Expansions,
    /// Project variables, layered over `expansions`.
    pub vars: BTreeMap<String, String>,
    /// Names of variables whose values must never reach logs.
    pub private_vars: BTreeMap<String, bool>,
}

impl ExpansionVars {
    pub fn redacted_keys(&self) -> Vec<String> {
        self.private_vars
            .iter()
            .filter(|(_, private)| **private)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Expansions with every project variable applied on top.
    pub fn resolve(&self) -> Expansions {
        let mut out = self.expansions.clone();
        out.update(self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        out
    }
}
