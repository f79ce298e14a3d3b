//! Core error types for berylc-util.

use thiserror::Error;

/// Error type for symbol table operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    /// Symbol id does not resolve in the owning table.
    #[error("symbol not found: id {id}")]
    NotFound { id: u32 },
}

/// Result type alias for symbol operations.
pub type UtilResult<T> = std::result::Result<T, SymbolError>;
