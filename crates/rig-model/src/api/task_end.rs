use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CommandType, TaskStatus};

/// Kind of timeout that ended a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutType {
    Idle,
    Exec,
    /// Teardown block ran past the callback timeout.
    Teardown,
}

impl TimeoutType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutType::Idle => "idle",
            TimeoutType::Exec => "exec",
            TimeoutType::Teardown => "teardown",
        }
    }
}

impl fmt::Display for TimeoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processes reported as killed by the kernel OOM killer during a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OomTrackerInfo {
    pub detected: bool,
    pub pids: Vec<i32>,
}

/// Final report for a task run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskEndDetail {
    pub status: TaskStatus,
    /// Type of the command that failed the task.
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub description: String,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_type: Option<TimeoutType>,
    pub timeout_duration_secs: u64,
    #[serde(rename = "oom_killer", skip_serializing_if = "Option::is_none")]
    pub oom_tracker: Option<OomTrackerInfo>,
    /// Display name of the command that failed the task.
    pub failing_command: String,
    pub trace_id: String,
}

impl TaskEndDetail {
    pub fn succeeded() -> Self {
        Self {
            status: TaskStatus::Succeeded,
            ..Default::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status != TaskStatus::Succeeded
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndTaskResponse {
    pub should_exit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_detail_wire_names() {
        let detail = TaskEndDetail {
            status: TaskStatus::Failed,
            command_type: CommandType::System,
            timed_out: true,
            timeout_type: Some(TimeoutType::Idle),
            timeout_duration_secs: 30,
            oom_tracker: Some(OomTrackerInfo {
                detected: true,
                pids: vec![42],
            }),
            ..Default::default()
        };

        let v = serde_json::to_value(&detail).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["type"], "system");
        assert_eq!(v["timeout_type"], "idle");
        assert_eq!(v["oom_killer"]["pids"][0], 42);
    }

    #[test]
    fn succeeded_omits_optional_fields() {
        let v = serde_json::to_value(TaskEndDetail::succeeded()).unwrap();
        assert!(v.get("timeout_type").is_none());
        assert!(v.get("oom_killer").is_none());
        assert!(!TaskEndDetail::succeeded().is_failure());
    }
}
