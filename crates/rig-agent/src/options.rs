use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use rig_model::{Ec2Key, S3Credentials};

use crate::timeout::DEFAULT_CALLBACK_TIMEOUT;

/// Where the agent runs. Pods get no distro view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Host,
    Pod,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Host => "host",
            Mode::Pod => "pod",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(Mode::Host),
            "pod" => Ok(Mode::Pod),
            other => Err(format!("unknown agent mode '{other}' (expected: host|pod)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub host_id: String,
    pub host_secret: String,
    pub mode: Mode,
    /// Root working directory of every task.
    pub working_directory: PathBuf,
    pub heartbeat_interval: Duration,
    /// Consecutive heartbeat failures tolerated before the task is stopped.
    pub max_failed_heartbeats: u32,
    /// How long a cancelled command may keep running before it is dropped.
    pub command_cleanup_grace: Duration,
    /// Poll period of the idle and exec watchdogs.
    pub idle_check_interval: Duration,
    /// Deadline of teardown blocks when the project sets none.
    pub callback_timeout: Duration,
    /// Pause between polls when the controller has no work.
    pub next_task_interval: Duration,
    pub cloud_provider: String,
    pub task_sync: S3Credentials,
    pub ec2_keys: Vec<Ec2Key>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            host_id: String::new(),
            host_secret: String::new(),
            mode: Mode::Host,
            working_directory: PathBuf::from("/data/rig"),
            heartbeat_interval: Duration::from_secs(30),
            max_failed_heartbeats: 10,
            command_cleanup_grace: Duration::from_secs(10),
            idle_check_interval: Duration::from_secs(1),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            next_task_interval: Duration::from_secs(10),
            cloud_provider: String::new(),
            task_sync: S3Credentials::default(),
            ec2_keys: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!(" Pod ".parse::<Mode>().unwrap(), Mode::Pod);
        assert_eq!("host".parse::<Mode>().unwrap(), Mode::Host);
        assert!("vm".parse::<Mode>().is_err());
        assert_eq!(Mode::Pod.to_string(), "pod");
    }

    #[test]
    fn defaults() {
        let opts = AgentOptions::default();
        assert_eq!(opts.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(opts.max_failed_heartbeats, 10);
        assert_eq!(opts.callback_timeout, Duration::from_secs(15 * 60));
        assert_eq!(opts.mode, Mode::Host);
    }
}
