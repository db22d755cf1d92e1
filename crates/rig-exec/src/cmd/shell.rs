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
struct ShellParams {
    script: String,
    /// Interpreter invoked as `<shell> -c <script>`.
    shell: String,
    #[serde(flatten)]
    proc: ProcParams,
}

/// `shell.exec`: run a script through a shell.
#[derive(Debug, Default)]
pub struct ShellExec {
    base: CommandBase,
    params: ShellParams,
}

impl ShellExec {
    pub const NAME: &'static str = "shell.exec";
    const DEFAULT_SHELL: &'static str = "sh";
}

#[async_trait]
impl Command for ShellExec {
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
        let params: ShellParams = decode_params(Self::NAME, params)?;
        if params.script.trim().is_empty() {
            return Err(CoreError::ParamDecode {
                command: Self::NAME.into(),
                reason: "script must not be empty".into(),
            });
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
        let script = conf.expand(&self.params.script).map_err(ExecError::from)?;
        let shell = match self.params.shell.as_str() {
            "" => Self::DEFAULT_SHELL.to_string(),
            shell => shell.to_string(),
        };
        let spec = self
            .params
            .proc
            .to_spec(shell, vec!["-c".into(), script.clone()], conf)?;

        if !spec.output.silent {
            logger.execution().info(format!(
                "Running script with shell '{}' in '{}': {}",
                spec.program,
                spec.cwd.display(),
                conf.redact(&script)
            ));
        }

        let result = proc::run(&spec, &cancel, logger, conf).await;
        self.params.proc.finish(result, logger)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use rig_core::mock::{MemoryLogger, MockCommunicator, task_config};
    use rig_model::{LogStream, Project};

    use super::*;

    fn parse(params: Value) -> Result<ShellExec, CoreError> {
        let mut cmd = ShellExec::default();
        let Value::Object(map) = params else {
            panic!("params must be an object")
        };
        cmd.parse_params(&map)?;
        Ok(cmd)
    }

    #[test]
    fn empty_script_is_rejected() {
        assert!(matches!(
            parse(serde_json::json!({ "script": "  " })),
            Err(CoreError::ParamDecode { .. })
        ));
        assert!(parse(serde_json::json!({ "script": "true", "silent": true })).is_ok());
    }

    #[tokio::test]
    async fn runs_expanded_script_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let conf = task_config(dir.path(), Project::default());
        conf.update_expansions(|e| e.put("greeting", "hello"));
        let logger = MemoryLogger::new();

        let cmd = parse(serde_json::json!({
            "script": "echo ${greeting} from $(basename $(pwd)) $EXTRA",
            "working_dir": "sub",
            "env": { "EXTRA": "${greeting}!" },
        }))
        .unwrap();
        cmd.execute(CancellationToken::new(), &MockCommunicator::new(), &logger, &conf)
            .await
            .unwrap();

        assert!(logger.contains(LogStream::Task, "hello from sub hello!"));
        assert!(logger.contains(LogStream::Execution, "Running script"));
    }

    #[tokio::test]
    async fn continue_on_err_swallows_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let conf = task_config(dir.path(), Project::default());
        let logger = MemoryLogger::new();
        let comm = MockCommunicator::new();

        let failing = parse(serde_json::json!({ "script": "exit 2" })).unwrap();
        let err = failing
            .execute(CancellationToken::new(), &comm, &logger, &conf)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Failed(_)));

        let tolerant =
            parse(serde_json::json!({ "script": "exit 2", "continue_on_err": true })).unwrap();
        tolerant
            .execute(CancellationToken::new(), &comm, &logger, &conf)
            .await
            .unwrap();
        assert!(logger.contains(LogStream::Execution, "continue_on_err"));
    }

    #[tokio::test]
    async fn redacted_values_are_masked() {
        let dir = tempfile::tempdir().unwrap();
        let mut conf = task_config(dir.path(), Project::default());
        conf.update_expansions(|e| e.put("token", "hunter2"));
        conf.redacted.insert("token".into());
        let logger = MemoryLogger::new();

        let cmd = parse(serde_json::json!({ "script": "echo ${token}" })).unwrap();
        cmd.execute(CancellationToken::new(), &MockCommunicator::new(), &logger, &conf)
            .await
            .unwrap();

        assert!(logger.messages().iter().all(|m| !m.message.contains("hunter2")));
        assert!(logger.contains(LogStream::Task, "<REDACTED:token>"));
    }

    #[tokio::test]
    async fn add_expansions_to_env() {
        let dir = tempfile::tempdir().unwrap();
        let conf = task_config(dir.path(), Project::default());
        conf.update_expansions(|e| e.put("build_id", "b42"));
        let logger = MemoryLogger::new();

        let cmd = parse(serde_json::json!({
            "script": "echo id=$build_id",
            "add_expansions_to_env": true,
        }))
        .unwrap();
        cmd.execute(CancellationToken::new(), &MockCommunicator::new(), &logger, &conf)
            .await
            .unwrap();
        assert!(logger.contains(LogStream::Task, "id=b42"));
    }
}
