use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log store error: {0}")]
    Store(String),
    #[error("failed to persist {} execution log update(s): {}", .0.len(), .0.join("; "))]
    Persistence(Vec<String>),
    #[error("log consumer terminated abnormally: {0}")]
    Consumer(String),
}
