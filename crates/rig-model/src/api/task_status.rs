use serde::{Deserialize, Serialize};

/// Reported state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Assigned but not started yet.
    #[default]
    Pending,
    Running,
    Succeeded,
    /// Failed, timed out or lost its heartbeat.
    Failed,
    /// Aborted by a user.
    Canceled,
}

impl TaskStatus {
    /// Returns `true` if the task won't transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());

        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn active_states() {
        assert!(TaskStatus::Pending.is_active());
        assert!(TaskStatus::Running.is_active());
        assert!(!TaskStatus::Canceled.is_active());
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_string(&TaskStatus::Succeeded).unwrap();
        assert_eq!(json, r#""succeeded""#);
    }
}
