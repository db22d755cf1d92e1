use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid project yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid expansion in '{input}': {reason}")]
    Expansion { input: String, reason: String },
}
