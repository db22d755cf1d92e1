//! Controller API seam.

use async_trait::async_trait;
use thiserror::Error;

use rig_model::{
    DistroView, EndTaskResponse, ExpansionVars, HeartbeatResponse, LogMessage, NextTaskResponse,
    Patch, Project, ProjectRef, Task, TaskData, TaskEndDetail,
};

#[derive(Debug, Error)]
pub enum CommError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("controller replied {code}: {message}")]
    Status { code: u16, message: String },

    #[error("decoding response: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Calls the agent makes to the controller.
///
/// Every call is scoped by the task identity it concerns. Retries are up to the implementation.
#[async_trait]
pub trait Communicator: Send + Sync {
    async fn start_task(&self, td: &TaskData) -> Result<(), CommError>;

    async fn end_task(
        &self,
        td: &TaskData,
        detail: &TaskEndDetail,
    ) -> Result<EndTaskResponse, CommError>;

    async fn get_task(&self, td: &TaskData) -> Result<Task, CommError>;

    async fn get_project(&self, td: &TaskData) -> Result<Project, CommError>;

    async fn get_expansion_vars(&self, td: &TaskData) -> Result<ExpansionVars, CommError>;

    /// `None` when the controller knows no project ref for the task.
    async fn get_project_ref(&self, td: &TaskData) -> Result<Option<ProjectRef>, CommError>;

    async fn get_distro_view(&self, td: &TaskData) -> Result<DistroView, CommError>;

    /// Patch of the task's version, or of `patch_id` when non-empty.
    async fn get_task_patch(&self, td: &TaskData, patch_id: &str) -> Result<Patch, CommError>;

    async fn heartbeat(&self, td: &TaskData) -> Result<HeartbeatResponse, CommError>;

    async fn get_next_task(&self) -> Result<NextTaskResponse, CommError>;

    async fn send_log_messages(&self, td: &TaskData, msgs: &[LogMessage])
    -> Result<(), CommError>;
}
