//! Spawning command processes and streaming their output into the task log.
use std::{path::PathBuf, process::Stdio};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use rig_core::{LoggerProducer, TaskConfig};
use rig_model::{LogSeverity, LogStream};

use crate::{
    error::{ExecError, ExecResult},
    limits::{RlimitConfig, attach_rlimits},
    util::{KILL_GRACE, isolate, kill_graceful},
};

/// Environment marker carrying the id of the task that spawned a process.
pub const TASK_ID_ENV: &str = "RIG_TASK_ID";
/// Environment marker carrying the pid of the agent that spawned a process.
pub const AGENT_PID_ENV: &str = "RIG_AGENT_PID";

/// What happens to a process's output.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    /// Log neither the invocation nor the output.
    pub silent: bool,
    /// Log stderr lines at the stdout level.
    pub redirect_stderr: bool,
    pub ignore_stdout: bool,
    pub ignore_stderr: bool,
}

#[derive(Debug, Clone)]
pub struct ProcSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    pub rlimits: RlimitConfig,
    pub output: OutputOptions,
}

impl ProcSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: cwd.into(),
            rlimits: RlimitConfig::default(),
            output: OutputOptions::default(),
        }
    }
}

struct LineSink<'a> {
    logger: &'a dyn LoggerProducer,
    conf: &'a TaskConfig,
    severity: LogSeverity,
    enabled: bool,
}

impl LineSink<'_> {
    /// Forward every line until EOF. Bytes that are not UTF-8 are replaced, never fatal.
    async fn drain<R: AsyncRead + Unpin>(self, reader: Option<R>) {
        let Some(reader) = reader else { return };
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => return,
                Ok(_) if self.enabled => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    self.logger
                        .emit(LogStream::Task, self.severity, &self.conf.redact(line));
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(target: "rig.exec.proc", error = %e, "reading output failed");
                    return;
                }
            }
        }
    }
}

/// Run `spec` to completion, streaming its output to the task log.
///
/// On cancellation the process group gets `SIGTERM`, then `SIGKILL` after a short grace.
pub async fn run(
    spec: &ProcSpec,
    cancel: &CancellationToken,
    logger: &dyn LoggerProducer,
    conf: &TaskConfig,
) -> ExecResult<()> {
    if spec.program.is_empty() {
        return Err(ExecError::MissingProgram("<empty>".into()));
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env(TASK_ID_ENV, &conf.task.id)
        .env(AGENT_PID_ENV, std::process::id().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate(&mut cmd);
    attach_rlimits(&mut cmd, &spec.rlimits);

    trace!(target: "rig.exec.proc", program = %spec.program, args = ?spec.args, cwd = %spec.cwd.display(), "spawn");
    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExecError::MissingProgram(spec.program.clone()),
        _ => ExecError::Spawn(e.to_string()),
    })?;

    let out = LineSink {
        logger,
        conf,
        severity: LogSeverity::Info,
        enabled: !spec.output.silent && !spec.output.ignore_stdout,
    };
    let err = LineSink {
        logger,
        conf,
        severity: if spec.output.redirect_stderr {
            LogSeverity::Info
        } else {
            LogSeverity::Error
        },
        enabled: !spec.output.silent && !spec.output.ignore_stderr,
    };
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let status = tokio::select! {
        status = async {
            tokio::join!(out.drain(stdout), err.drain(stderr));
            child.wait().await
        } => status?,
        _ = cancel.cancelled() => {
            debug!(target: "rig.exec.proc", program = %spec.program, "cancelled; killing process group");
            if let Err(e) = kill_graceful(&mut child, KILL_GRACE).await {
                warn!(target: "rig.exec.proc", program = %spec.program, error = %e, "killing process group failed");
            }
            return Err(ExecError::Cancelled);
        }
    };

    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(ExecError::NonZeroExit { code }),
        None => Err(ExecError::KilledBySignal),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use rig_core::mock::{MemoryLogger, task_config};
    use rig_model::Project;

    use super::*;

    fn sh(script: &str, cwd: &std::path::Path) -> ProcSpec {
        let mut spec = ProcSpec::new("sh", cwd);
        spec.args = vec!["-c".into(), script.into()];
        spec
    }

    #[tokio::test]
    async fn streams_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let conf = task_config(dir.path(), Project::default());
        let logger = MemoryLogger::new();

        run(
            &sh("echo out; echo err 1>&2", dir.path()),
            &CancellationToken::new(),
            &logger,
            &conf,
        )
        .await
        .unwrap();

        let msgs = logger.messages();
        assert!(msgs.iter().any(|m| m.message == "out" && m.severity == LogSeverity::Info));
        assert!(msgs.iter().any(|m| m.message == "err" && m.severity == LogSeverity::Error));
    }

    #[tokio::test]
    async fn exports_markers() {
        let dir = tempfile::tempdir().unwrap();
        let conf = task_config(dir.path(), Project::default());
        let logger = MemoryLogger::new();

        run(
            &sh("echo task=$RIG_TASK_ID pid=$RIG_AGENT_PID", dir.path()),
            &CancellationToken::new(),
            &logger,
            &conf,
        )
        .await
        .unwrap();

        let expected = format!("task=t1 pid={}", std::process::id());
        assert!(logger.contains(LogStream::Task, &expected));
    }

    #[tokio::test]
    async fn non_zero_exit_and_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let conf = task_config(dir.path(), Project::default());
        let logger = MemoryLogger::new();
        let cancel = CancellationToken::new();

        let err = run(&sh("exit 3", dir.path()), &cancel, &logger, &conf)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::NonZeroExit { code: 3 }));

        let err = run(
            &ProcSpec::new("definitely-not-a-binary-rig", dir.path()),
            &cancel,
            &logger,
            &conf,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::MissingProgram(_)));
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_stop_output() {
        let dir = tempfile::tempdir().unwrap();
        let conf = task_config(dir.path(), Project::default());
        let logger = MemoryLogger::new();

        let script = "echo before; printf 'caf\\351\\n'; \
                      i=0; while [ $i -lt 20000 ]; do echo \"line $i\"; i=$((i+1)); done; \
                      echo after";
        run(&sh(script, dir.path()), &CancellationToken::new(), &logger, &conf)
            .await
            .unwrap();

        let lines = logger.lines(LogStream::Task);
        assert_eq!(lines.len(), 20003);
        assert_eq!(lines[0], "before");
        assert_eq!(lines[1], "caf\u{FFFD}");
        assert_eq!(lines.last().map(String::as_str), Some("after"));
    }

    #[tokio::test]
    async fn silent_hides_output() {
        let dir = tempfile::tempdir().unwrap();
        let conf = task_config(dir.path(), Project::default());
        let logger = MemoryLogger::new();

        let mut spec = sh("echo hidden", dir.path());
        spec.output.silent = true;
        run(&spec, &CancellationToken::new(), &logger, &conf)
            .await
            .unwrap();
        assert!(logger.messages().is_empty());
    }

    #[tokio::test]
    async fn cancel_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let conf = task_config(dir.path(), Project::default());
        let logger = MemoryLogger::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = run(&sh("sleep 30", dir.path()), &cancel, &logger, &conf)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
