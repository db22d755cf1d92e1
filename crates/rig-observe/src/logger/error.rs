use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown log format '{0}', expected text, json or journald")]
    InvalidFormat(String),

    #[error("journald output needs linux and the `journald` feature")]
    JournaldNotSupported,

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,

    #[error("installing subscriber: {0}")]
    InitializationFailed(String),

    #[error("invalid filter directives '{directives}': {reason}")]
    InvalidLogLevel { directives: String, reason: String },
}
