use std::{path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

use rig_agent::{AgentOptions, Mode};
use rig_observe::{LoggerConfig, LoggerFormat};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Daemon settings, read from `RIG_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the controller API.
    pub api_server: String,
    pub request_timeout: Duration,
    pub logger: LoggerConfig,
    pub agent: AgentOptions,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| {
            get(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let mut logger = LoggerConfig::default();
        if let Some(level) = get("RIG_LOG_LEVEL") {
            logger.level = level;
        }
        if let Some(format) = get("RIG_LOG_FORMAT") {
            logger.format = parse("RIG_LOG_FORMAT", &format, LoggerFormat::from_str)?;
        }
        if let Some(v) = get("RIG_LOG_TASK_OUTPUT") {
            logger.echo_task_output = parse("RIG_LOG_TASK_OUTPUT", &v, bool::from_str)?;
        }

        let mut agent = AgentOptions {
            host_id: required("RIG_HOST_ID")?,
            host_secret: get("RIG_HOST_SECRET").unwrap_or_default(),
            ..Default::default()
        };
        if let Some(mode) = get("RIG_MODE") {
            agent.mode = parse("RIG_MODE", &mode, Mode::from_str)?;
        }
        if let Some(dir) = get("RIG_WORKING_DIR") {
            agent.working_directory = PathBuf::from(dir);
        }
        if let Some(v) = get("RIG_HEARTBEAT_INTERVAL_SECS") {
            agent.heartbeat_interval = secs("RIG_HEARTBEAT_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("RIG_MAX_FAILED_HEARTBEATS") {
            agent.max_failed_heartbeats = parse("RIG_MAX_FAILED_HEARTBEATS", &v, u32::from_str)?;
        }
        if let Some(v) = get("RIG_CLEANUP_GRACE_SECS") {
            agent.command_cleanup_grace = secs("RIG_CLEANUP_GRACE_SECS", &v)?;
        }
        if let Some(v) = get("RIG_CALLBACK_TIMEOUT_SECS") {
            agent.callback_timeout = secs("RIG_CALLBACK_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("RIG_CLOUD_PROVIDER") {
            agent.cloud_provider = v;
        }

        let request_timeout = match get("RIG_REQUEST_TIMEOUT_SECS") {
            Some(v) => secs("RIG_REQUEST_TIMEOUT_SECS", &v)?,
            None => Duration::from_secs(30),
        };

        Ok(Self {
            api_server: required("RIG_API_SERVER")?
                .trim_end_matches('/')
                .to_string(),
            request_timeout,
            logger,
            agent,
        })
    }
}

fn parse<T, E: ToString>(
    var: &'static str,
    value: &str,
    f: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, ConfigError> {
    f(value.trim()).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match parse(var, value, u64::from_str)? {
        0 => Err(ConfigError::Invalid {
            var,
            reason: "must be greater than zero".into(),
        }),
        n => Ok(Duration::from_secs(n)),
    }
}
