//! CLI error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BeryltError {
    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Setup(String),

    #[error(transparent)]
    Interpreter(#[from] bvm::BerylError),
}

pub type Result<T> = std::result::Result<T, BeryltError>;
