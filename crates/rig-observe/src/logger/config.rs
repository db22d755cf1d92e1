use std::io::IsTerminal;

use serde::Deserialize;

use crate::logger::format::LoggerFormat;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directives, e.g. `info` or `rig.task=debug,warn`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
    /// Echo command output lines (`rig.task`) locally. They reach the controller either way.
    pub echo_task_output: bool,
}

impl LoggerConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LoggerFormat) -> Self {
        self.format = format;
        self
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color: std::io::stdout().is_terminal(),
            echo_task_output: true,
        }
    }
}
