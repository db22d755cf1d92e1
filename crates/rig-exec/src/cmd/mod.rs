mod expansions;
pub use expansions::ExpansionsUpdate;

mod shell;
pub use shell::ShellExec;

mod subprocess;
pub use subprocess::SubprocessExec;

mod timeout;
pub use timeout::TimeoutUpdate;

use std::collections::BTreeMap;

use serde::Deserialize;

use rig_core::{CommandError, LoggerProducer, TaskConfig};

use crate::{
    error::{ExecError, ExecResult},
    limits::RlimitConfig,
    proc::{OutputOptions, ProcSpec},
};

/// Params shared by the process-spawning commands.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ProcParams {
    working_dir: String,
    env: BTreeMap<String, String>,
    add_expansions_to_env: bool,
    silent: bool,
    continue_on_err: bool,
    redirect_standard_error_to_output: bool,
    ignore_standard_out: bool,
    ignore_standard_error: bool,
    limits: RlimitConfig,
}

impl ProcParams {
    /// Resolve the params against the current expansions.
    pub(crate) fn to_spec(
        &self,
        program: String,
        args: Vec<String>,
        conf: &TaskConfig,
    ) -> ExecResult<ProcSpec> {
        let cwd = conf.get_working_directory(&conf.expand(&self.working_dir)?)?;

        let mut env = Vec::new();
        if self.add_expansions_to_env {
            env.extend(
                conf.expansions()
                    .iter()
                    .map(|kv| (kv.key().to_string(), kv.value().to_string())),
            );
        }
        for (k, v) in &self.env {
            env.push((k.clone(), conf.expand(v)?));
        }

        Ok(ProcSpec {
            program,
            args,
            env,
            cwd,
            rlimits: self.limits.clone(),
            output: OutputOptions {
                silent: self.silent,
                redirect_stderr: self.redirect_standard_error_to_output,
                ignore_stdout: self.ignore_standard_out,
                ignore_stderr: self.ignore_standard_error,
            },
        })
    }

    /// Map a process outcome to the command result, honouring `continue_on_err`.
    pub(crate) fn finish(
        &self,
        result: ExecResult<()>,
        logger: &dyn LoggerProducer,
    ) -> Result<(), CommandError> {
        match result {
            Err(e @ (ExecError::NonZeroExit { .. } | ExecError::KilledBySignal))
                if self.continue_on_err =>
            {
                logger
                    .execution()
                    .warn(format!("Command failed ({e}); continuing because continue_on_err is set."));
                Ok(())
            }
            other => other.map_err(CommandError::from),
        }
    }
}
