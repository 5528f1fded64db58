use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid size: {0} (expected e.g. 512M, 20G)")]
    InvalidSize(String),
    #[error("invalid environment entry: {0} (expected KEY=VALUE)")]
    InvalidEnv(String),
}
