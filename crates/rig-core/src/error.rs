use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("'{0}' is already registered")]
    DuplicateKey(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("decoding params for '{command}': {reason}")]
    ParamDecode { command: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("path '{}' does not exist", .0.display())]
    NotExist(PathBuf),

    #[error("path '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("retrieving file info for path '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("programmatic error: {0}")]
    Programmatic(String),

    #[error("building task baggage: {}", .0.join("; "))]
    Baggage(Vec<String>),
}
