use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpanlensError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("metric error: {0}")]
    Metric(String),

    #[error("repository error: {0}")]
    Repository(String),
}

pub type Result<T> = std::result::Result<T, SpanlensError>;
