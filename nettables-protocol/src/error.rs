//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding the byte stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("incomplete message: need {needed} more bytes")]
    Incomplete { needed: usize },

    #[error("unexpected tag byte {0:#04x}")]
    UnexpectedTag(u8),

    #[error("unexpected value type {0:#04x}")]
    UnexpectedType(u8),

    #[error("byte {byte:#04x} is outside the {range} range")]
    OutOfRange { byte: u8, range: &'static str },

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("string of {len} bytes contains NUL and cannot use the long form")]
    NulInLongString { len: usize },

    #[error("string of {len} bytes exceeds the {max} byte limit")]
    StringTooLong { len: usize, max: usize },
}

impl ProtocolError {
    /// Returns true when more input would let decoding continue.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ProtocolError::Incomplete { .. })
    }
}
