//! Task log seam.
//!
//! Commands and the execution loop never talk to a subscriber directly: they write through a
//! [`LoggerProducer`], split into three streams (`execution`, `system`, `task`).
use rig_model::{LogSeverity, LogStream};
use tracing::{debug, error, info, warn};

pub trait LoggerProducer: Send + Sync {
    fn emit(&self, stream: LogStream, severity: LogSeverity, message: &str);

    /// Push buffered messages downstream. No-op by default.
    fn flush(&self) {}
}

impl<'l> dyn LoggerProducer + 'l {
    /// Agent-side progress of the run.
    pub fn execution(&self) -> StreamLogger<'_> {
        StreamLogger::new(self, LogStream::Execution)
    }

    pub fn system(&self) -> StreamLogger<'_> {
        StreamLogger::new(self, LogStream::System)
    }

    /// Output of the task's own commands.
    pub fn task(&self) -> StreamLogger<'_> {
        StreamLogger::new(self, LogStream::Task)
    }
}

/// Producer bound to one stream.
pub struct StreamLogger<'a> {
    inner: &'a dyn LoggerProducer,
    stream: LogStream,
}

impl<'a> StreamLogger<'a> {
    pub fn new(inner: &'a dyn LoggerProducer, stream: LogStream) -> Self {
        Self { inner, stream }
    }

    #[inline]
    pub fn debug(&self, msg: impl AsRef<str>) {
        self.inner.emit(self.stream, LogSeverity::Debug, msg.as_ref());
    }

    #[inline]
    pub fn info(&self, msg: impl AsRef<str>) {
        self.inner.emit(self.stream, LogSeverity::Info, msg.as_ref());
    }

    #[inline]
    pub fn warn(&self, msg: impl AsRef<str>) {
        self.inner.emit(self.stream, LogSeverity::Warn, msg.as_ref());
    }

    #[inline]
    pub fn error(&self, msg: impl AsRef<str>) {
        self.inner.emit(self.stream, LogSeverity::Error, msg.as_ref());
    }
}

/// Forwards every line to `tracing` on the `rig.execution`, `rig.system` and `rig.task` targets.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    task_id: String,
}

impl TracingLogger {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

macro_rules! emit_on {
    ($target:literal, $severity:expr, $task_id:expr, $msg:expr) => {
        match $severity {
            LogSeverity::Debug => debug!(target: $target, task_id = %$task_id, "{}", $msg),
            LogSeverity::Info => info!(target: $target, task_id = %$task_id, "{}", $msg),
            LogSeverity::Warn => warn!(target: $target, task_id = %$task_id, "{}", $msg),
            LogSeverity::Error => error!(target: $target, task_id = %$task_id, "{}", $msg),
        }
    };
}

impl LoggerProducer for TracingLogger {
    fn emit(&self, stream: LogStream, severity: LogSeverity, message: &str) {
        match stream {
            LogStream::Execution => emit_on!("rig.execution", severity, self.task_id, message),
            LogStream::System => emit_on!("rig.system", severity, self.task_id, message),
            LogStream::Task => emit_on!("rig.task", severity, self.task_id, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryLogger;

    #[test]
    fn stream_helpers_route_to_stream() {
        let logger = MemoryLogger::new();
        let producer: &dyn LoggerProducer = &logger;

        producer.execution().info("starting");
        producer.task().warn("line");
        producer.system().error("disk");

        let lines = logger.messages();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].stream, LogStream::Execution);
        assert_eq!(lines[1].severity, LogSeverity::Warn);
        assert_eq!(lines[2].message, "disk");
        assert!(logger.contains(LogStream::Task, "line"));
    }

    #[test]
    fn tracing_logger_does_not_need_subscriber() {
        let logger = TracingLogger::new("t1");
        let producer: &dyn LoggerProducer = &logger;
        producer.task().info("no subscriber installed");
    }
}
