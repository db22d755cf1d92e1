use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use rig_core::{
    Command, CommandBase, CommandError, Communicator, CoreError, LoggerProducer, TaskConfig,
    command::decode_params,
};

use crate::ExecError;

/// Seconds given either as a number or as a string that may reference expansions.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Secs {
    Number(u64),
    Text(String),
}

impl Secs {
    fn resolve(&self, conf: &TaskConfig) -> Result<Duration, ExecError> {
        let secs = match self {
            Secs::Number(n) => *n,
            Secs::Text(s) => {
                let expanded = conf.expand(s)?;
                expanded.trim().parse().map_err(|_| {
                    ExecError::InvalidParams(format!("'{expanded}' is not a number of seconds"))
                })?
            }
        };
        Ok(Duration::from_secs(secs))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TimeoutParams {
    exec_timeout_secs: Option<Secs>,
    /// Idle timeout.
    timeout_secs: Option<Secs>,
}

/// `timeout.update`: override the task's idle and exec timeouts while it runs.
#[derive(Debug, Default)]
pub struct TimeoutUpdate {
    base: CommandBase,
    params: TimeoutParams,
}

impl TimeoutUpdate {
    pub const NAME: &'static str = "timeout.update";
}

#[async_trait]
impl Command for TimeoutUpdate {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CommandBase {
        &mut self.base
    }

    fn parse_params(&mut self, params: &Map<String, Value>) -> Result<(), CoreError> {
        let params: TimeoutParams = decode_params(Self::NAME, params)?;
        if params.exec_timeout_secs.is_none() && params.timeout_secs.is_none() {
            return Err(CoreError::ParamDecode {
                command: Self::NAME.into(),
                reason: "one of 'exec_timeout_secs' or 'timeout_secs' is required".into(),
            });
        }
        self.params = params;
        Ok(())
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        _comm: &dyn Communicator,
        logger: &dyn LoggerProducer,
        conf: &TaskConfig,
    ) -> Result<(), CommandError> {
        if let Some(secs) = &self.params.exec_timeout_secs {
            let timeout = secs.resolve(conf)?;
            conf.set_exec_timeout(timeout);
            logger
                .execution()
                .info(format!("Set exec timeout to {}s.", timeout.as_secs()));
        }
        if let Some(secs) = &self.params.timeout_secs {
            let timeout = secs.resolve(conf)?;
            conf.set_idle_timeout(timeout);
            logger
                .execution()
                .info(format!("Set idle timeout to {}s.", timeout.as_secs()));
        }
        Ok(())
    }
}
