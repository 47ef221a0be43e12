use spendql_core::SpendqlError;

/// Why an invocation produced no result.
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
    #[error(transparent)]
    Gateway(#[from] SpendqlError),
    #[error("Handler panicked: {0}")]
    Panicked(String),
}
