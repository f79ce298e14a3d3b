//! Error taxonomy.
//!
//! Runtime exceptions are *values*: they travel through the VM unwind
//! protocol as [`VmError::Raise`] until rescued or delivered to the
//! host. Parse, codegen and image errors never enter the value domain;
//! they surface as [`BerylError`] variants directly. Fatal errors
//! terminate the interpreter.

use thiserror::Error;

use crate::value::Value;

/// Control-flow error inside the VM and native methods.
#[derive(Debug)]
pub enum VmError {
    /// An exception value is in flight.
    Raise(Value),
    /// Unrecoverable: double allocation failure, corrupt bytecode.
    Fatal(String),
}

pub type VmResult<T> = std::result::Result<T, VmError>;

/// Host-facing error for the embedding API.
#[derive(Debug, Error)]
pub enum BerylError {
    /// Syntax errors, accumulated; carries the first message.
    #[error("syntax error: {first} ({count} error(s))")]
    Parse { first: String, count: usize },

    #[error(transparent)]
    Codegen(#[from] berylc_gen::CodegenError),

    #[error(transparent)]
    Image(#[from] berylc_bc::BcError),

    /// An exception reached the host unrescued. The value itself stays
    /// readable through `State::last_exception`.
    #[error("{class}: {message}")]
    Exception { class: String, message: String },

    #[error("fatal: {0}")]
    Fatal(String),
}
