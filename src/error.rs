use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("source timed out after {0}ms")]
    Timeout(u64),
    #[error("command failed: {0}")]
    Command(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
