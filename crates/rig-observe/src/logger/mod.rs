mod config;
mod error;
mod format;
mod log;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use format::LoggerFormat;

/// Install the global subscriber described by `cfg`.
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    log::install(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_already_initialized() {
        let cfg = LoggerConfig::default().with_level("rig=debug,warn");
        let _ = logger_init(&cfg);
        assert!(matches!(
            logger_init(&cfg),
            Err(LoggerError::AlreadyInitialized)
        ));
    }

    #[test]
    fn invalid_level_is_rejected_before_install() {
        let cfg = LoggerConfig::default().with_level("rig=loud");
        assert!(matches!(
            logger_init(&cfg),
            Err(LoggerError::InvalidLogLevel { .. })
        ));
    }
}
