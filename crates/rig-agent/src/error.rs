use thiserror::Error;

use rig_core::{CommError, CoreError};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("controller call failed: {0}")]
    Comm(#[from] CommError),

    #[error("agent retrieved an empty project ref")]
    EmptyProjectRef,

    #[error("programmatic error: {0}")]
    Programmatic(String),
}
