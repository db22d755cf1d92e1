use thiserror::Error;

use rig_core::{CommandError, CoreError};
use rig_model::ModelError;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("non-zero exit code: {code}")]
    NonZeroExit { code: i32 },
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("killed by signal")]
    KilledBySignal,
    #[error("missing program: {0}")]
    MissingProgram(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Expansion(#[from] ModelError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<ExecError> for CommandError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Cancelled => CommandError::Cancelled,
            ExecError::Core(e) => CommandError::Core(e),
            other => CommandError::Failed(other.to_string()),
        }
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
