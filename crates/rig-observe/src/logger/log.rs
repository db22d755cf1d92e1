use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::time::OffsetTime, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

type Output = Box<dyn Layer<Registry> + Send + Sync>;

/// Target of command output lines echoed by the agent.
const TASK_OUTPUT_TARGET: &str = "rig.task";

pub(crate) fn install(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = filter(cfg)?;
    let output = match cfg.format {
        LoggerFormat::Text => fmt::layer()
            .with_ansi(cfg.use_color)
            .with_target(cfg.with_targets)
            .with_timer(timer())
            .boxed(),
        // One object per line; the enclosing task span carries the task identity.
        LoggerFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(cfg.with_targets)
            .with_timer(timer())
            .boxed(),
        LoggerFormat::Journald => journald()?,
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("already") {
                LoggerError::AlreadyInitialized
            } else {
                LoggerError::InitializationFailed(msg)
            }
        })
}

fn filter(cfg: &LoggerConfig) -> Result<EnvFilter, LoggerError> {
    let mut directives = cfg.level.trim().to_string();
    if !cfg.echo_task_output {
        if !directives.is_empty() {
            directives.push(',');
        }
        directives.push_str(TASK_OUTPUT_TARGET);
        directives.push_str("=off");
    }
    EnvFilter::try_new(&directives).map_err(|e| LoggerError::InvalidLogLevel {
        directives,
        reason: e.to_string(),
    })
}

fn timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn journald() -> Result<Output, LoggerError> {
    let layer = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journald: {e}")))?
        .with_syslog_identifier("rig-agentd".to_string());
    Ok(layer.boxed())
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journald() -> Result<Output, LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muting_task_output_extends_directives() {
        let mut cfg = LoggerConfig::default().with_level("debug");
        cfg.echo_task_output = false;
        assert!(filter(&cfg).unwrap().to_string().contains("rig.task=off"));

        cfg.echo_task_output = true;
        assert!(!filter(&cfg).unwrap().to_string().contains("rig.task"));
    }

    #[test]
    fn bad_directives_are_reported_whole() {
        let cfg = LoggerConfig::default().with_level("rig=loud");
        match filter(&cfg) {
            Err(LoggerError::InvalidLogLevel { directives, .. }) => assert_eq!(directives, "rig=loud"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
