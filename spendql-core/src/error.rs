#[derive(thiserror::Error, Debug)]
pub enum SpendqlError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Authentication(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Introspection error: {0}")]
    Introspection(String),
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Not ready: {0}")]
    NotReady(String),
    #[error("Execution error: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, SpendqlError>;
