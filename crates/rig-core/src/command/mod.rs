use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use rig_model::CommandType;

use crate::{CommError, Communicator, CoreError, LoggerProducer, TaskConfig};

/// Produces a fresh, unconfigured command instance.
pub type CommandFactory = Arc<dyn Fn() -> Box<dyn Command> + Send + Sync>;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandError {
    pub fn failed(reason: impl Into<String>) -> Self {
        CommandError::Failed(reason.into())
    }
}

/// Executable unit of a task.
///
/// Instances come from a [`CommandFactory`] and are configured once by the registry
/// (`parse_params` plus the [`CommandBase`] fields) before running.
#[async_trait]
pub trait Command: Send + Sync {
    /// Registry key, e.g. `shell.exec`.
    fn name(&self) -> &'static str;

    fn base(&self) -> &CommandBase;

    fn base_mut(&mut self) -> &mut CommandBase;

    fn parse_params(&mut self, params: &Map<String, Value>) -> Result<(), CoreError>;

    /// Run to completion or until `cancel` fires.
    ///
    /// Implementations must return promptly after cancellation; the caller drops the future
    /// once its grace period runs out.
    async fn execute(
        &self,
        cancel: CancellationToken,
        comm: &dyn Communicator,
        logger: &dyn LoggerProducer,
        conf: &TaskConfig,
    ) -> Result<(), CommandError>;

    fn display_name(&self) -> &str {
        match self.base().display_name() {
            "" => self.name(),
            name => name,
        }
    }

    fn command_type(&self) -> CommandType {
        self.base().command_type()
    }

    /// Command-declared idle timeout.
    fn idle_timeout(&self) -> Option<Duration> {
        self.base().idle_timeout()
    }
}

/// Fields every command carries regardless of its params.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBase {
    display_name: String,
    command_type: CommandType,
    idle_timeout: Option<Duration>,
    function_vars: BTreeMap<String, String>,
}

impl CommandBase {
    #[inline]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
    }

    #[inline]
    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn set_command_type(&mut self, command_type: CommandType) {
        self.command_type = command_type;
    }

    #[inline]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Zero clears the timeout.
    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
    }

    /// Expansions applied only while this command runs.
    #[inline]
    pub fn function_vars(&self) -> &BTreeMap<String, String> {
        &self.function_vars
    }

    pub fn set_function_vars(&mut self, vars: BTreeMap<String, String>) {
        self.function_vars = vars;
    }
}

/// Decode a command's `params` mapping into its typed form.
pub fn decode_params<T: DeserializeOwned>(
    command: &str,
    params: &Map<String, Value>,
) -> Result<T, CoreError> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| CoreError::ParamDecode {
        command: command.to_string(),
        reason: e.to_string(),
    })
}
