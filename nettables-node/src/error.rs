//! Node error types.

use nettables_core::Role;
use thiserror::Error;

/// Errors that close a connection or fail a registry operation.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] nettables_protocol::ProtocolError),

    #[error("core error: {0}")]
    Core(#[from] nettables_core::CoreError),

    #[error("unknown remote key id {0}")]
    UnknownKey(u32),

    #[error("unknown remote table id {0}")]
    UnknownTable(u32),

    #[error("denial received by a server")]
    UnexpectedDenial,

    #[error("table request received by a client")]
    UnexpectedTableRequest,

    #[error("acknowledged {count} messages but only {outstanding} are outstanding")]
    ExcessAcknowledgement { count: u32, outstanding: usize },

    #[error("peer reassigned its {kind} id {id}")]
    Reassigned { kind: &'static str, id: u32 },

    #[error("a {role} registry cannot {operation}")]
    WrongRole {
        role: Role,
        operation: &'static str,
    },

    #[error("client is already connected")]
    AlreadyConnected,
}
