use thiserror::Error;

#[derive(Error, Debug)]
pub enum DDoSError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<std::num::ParseFloatError> for DDoSError {
    fn from(err: std::num::ParseFloatError) -> Self {
        DDoSError::ParseError(err.to_string())
    }
}

impl From<&str> for DDoSError {
    fn from(msg: &str) -> Self {
        DDoSError::ConfigError(msg.to_string())
    }
}

impl From<String> for DDoSError {
    fn from(msg: String) -> Self {
        DDoSError::ConfigError(msg)
    }
}

impl From<ctrlc::Error> for DDoSError {
    fn from(err: ctrlc::Error) -> Self {
        DDoSError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DDoSError>;
