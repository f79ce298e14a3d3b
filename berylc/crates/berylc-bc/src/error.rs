//! Error types for bytecode handling.

use thiserror::Error;

/// Errors from instruction decoding and binary image handling.
#[derive(Debug, Error)]
pub enum BcError {
    #[error("invalid opcode value {value:#04x}")]
    BadOpcode { value: u8 },

    #[error("truncated image: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("bad image magic")]
    BadMagic,

    #[error("unsupported image version {found}")]
    BadVersion { found: String },

    #[error("image checksum mismatch: header {expected:#06x}, computed {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("malformed {section} section: {reason}")]
    MalformedSection {
        section: &'static str,
        reason: String,
    },

    #[error("image ends without END section")]
    MissingEnd,

    #[error("irep record too large to dump: {what} count {count}")]
    TooLarge { what: &'static str, count: usize },
}

/// Result type alias for bytecode operations.
pub type BcResult<T> = std::result::Result<T, BcError>;
