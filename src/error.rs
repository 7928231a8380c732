// Mon Feb 2 2026 - Alex

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),
    #[error("Matcher error: {0}")]
    Matcher(String),
    #[error("Worker failure: {0}")]
    WorkerFailure(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
