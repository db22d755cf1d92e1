use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Log stream a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    /// Agent-side progress of the run.
    Execution,
    /// Host-level diagnostics.
    System,
    /// Output of the task's own commands.
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Single log line shipped to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub stream: LogStream,
    pub severity: LogSeverity,
    pub message: String,
    #[serde(with = "time_serde")]
    pub timestamp: SystemTime,
}

impl LogMessage {
    pub fn now(stream: LogStream, severity: LogSeverity, message: impl Into<String>) -> Self {
        Self {
            stream,
            severity,
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }
}

mod time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        (since_epoch.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}
