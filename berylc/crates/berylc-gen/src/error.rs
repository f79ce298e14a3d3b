//! Code-generation errors.
//!
//! These are compile-time failures returned to the host; they abort the
//! current compilation unit and never enter the runtime value domain.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("expression too complex: register overflow at line {line}")]
    RegisterOverflow { line: u32 },

    #[error("too many literals in one scope")]
    TooManyLiterals,

    #[error("too many method symbols in one scope")]
    TooManySymbols,

    #[error("too many nested scopes")]
    TooManyScopes,

    #[error("jump offset out of range at line {line}")]
    JumpTooFar { line: u32 },

    #[error("{message} (line {line})")]
    Unsupported { message: String, line: u32 },
}

pub type CodegenResult<T> = std::result::Result<T, CodegenError>;
