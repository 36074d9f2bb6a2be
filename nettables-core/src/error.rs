//! Core error types.

use nettables_protocol::ProtocolError;
use thiserror::Error;

/// Errors reported synchronously to callers of the table API.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("key '{key}' holds a {actual}, not a {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("end of transaction without a matching begin on table {table}")]
    NoTransaction { table: u32 },

    #[error("key name must not be empty")]
    EmptyKey,

    #[error("invalid path: '{path}'")]
    InvalidPath { path: String },

    #[error("table {table} outlived its arena")]
    ArenaClosed { table: u32 },

    #[error("'{key}' cannot be sent to peers: {source}")]
    Unencodable { key: String, source: ProtocolError },
}
