use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use rig_core::{
    Command, CommandBase, CommandError, Communicator, CoreError, LoggerProducer, TaskConfig,
    command::decode_params,
};

use super::ProcParams;
use crate::{ExecError, proc};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SubprocessParams {
    binary: String,
    args: Vec<String>,
    /// Whitespace-separated shorthand for `binary` plus `args`.
    command: String,
    #[serde(flatten)]
    proc: ProcParams,
}

/// `subprocess.exec`: run a binary directly, without a shell.
#[derive(Debug, Default)]
pub struct SubprocessExec {
    base: CommandBase,
    params: SubprocessParams,
}

impl SubprocessExec {
    pub const NAME: &'static str = "subprocess.exec";
}

#[async_trait]
impl Command for SubprocessExec {
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
        let mut params: SubprocessParams = decode_params(Self::NAME, params)?;
        let invalid = |reason: &str| CoreError::ParamDecode {
            command: Self::NAME.into(),
            reason: reason.into(),
        };

        match (params.command.trim().is_empty(), params.binary.is_empty()) {
            (false, false) => return Err(invalid("'command' and 'binary' are mutually exclusive")),
            (true, true) => return Err(invalid("one of 'command' or 'binary' is required")),
            (false, true) => {
                if !params.args.is_empty() {
                    return Err(invalid("'args' cannot be combined with 'command'"));
                }
                let mut parts = params.command.split_whitespace().map(str::to_string);
                params.binary = parts.next().unwrap_or_default();
                params.args = parts.collect();
            }
            (true, false) => {}
        }
        self.params = params;
        Ok(())
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _comm: &dyn Communicator,
        logger: &dyn LoggerProducer,
        conf: &TaskConfig,
    ) -> Result<(), CommandError> {
        let binary = conf.expand(&self.params.binary).map_err(ExecError::from)?;
        let args = self
            .params
            .args
            .iter()
            .map(|a| conf.expand(a))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ExecError::from)?;
        let spec = self.params.proc.to_spec(binary, args, conf)?;

        if !spec.output.silent {
            logger.execution().info(format!(
                "Running '{}' in '{}'",
                conf.redact(&format!("{} {}", spec.program, spec.args.join(" "))),
                spec.cwd.display()
            ));
        }

        let result = proc::run(&spec, &cancel, logger, conf).await;
        self.params.proc.finish(result, logger)
    }
}
