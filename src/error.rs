
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Adaptation error: no adapter provides {0}")]
    Adaptation(String),
    #[error("Annotation error: {0}")]
    Annotation(String),
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize>, col: Option<usize> },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DomError>;

// Helper conversions
impl From<rusqlite::Error> for DomError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}

impl From<serde_json::Error> for DomError {
    fn from(e: serde_json::Error) -> Self { Self::Serialization(e.to_string()) }
}

impl From<config::ConfigError> for DomError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
