//! The protocol message alphabet as queued for one peer.

use crate::key::Key;
use crate::table::Table;
use crate::value::Entry;
use nettables_protocol::{ProtocolError, WireMessage};
use std::fmt;
use std::sync::Arc;

/// Discriminant of [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Entry,
    OldData,
    Confirmation,
    Denial,
    TransactionStart,
    TransactionEnd,
    TableRequest,
    TableAssignment,
    FieldAssignment,
}

#[derive(Clone)]
pub enum Message {
    /// A value assignment.
    Entry(Arc<Entry>),
    /// A value the receiver must take even if it considers it stale.
    OldData(Arc<Entry>),
    Confirmation(u32),
    Denial(u32),
    TransactionStart,
    TransactionEnd,
    /// Asks the server to subscribe us to a named table.
    TableRequest { name: String, table: Arc<Table> },
    /// Tells the peer which of our tables matches its `alternate_id`.
    TableAssignment { table: Arc<Table>, alternate_id: u32 },
    /// Announces a key so the peer can resolve its id.
    FieldAssignment(Arc<Key>),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Entry(_) => MessageKind::Entry,
            Message::OldData(_) => MessageKind::OldData,
            Message::Confirmation(_) => MessageKind::Confirmation,
            Message::Denial(_) => MessageKind::Denial,
            Message::TransactionStart => MessageKind::TransactionStart,
            Message::TransactionEnd => MessageKind::TransactionEnd,
            Message::TableRequest { .. } => MessageKind::TableRequest,
            Message::TableAssignment { .. } => MessageKind::TableAssignment,
            Message::FieldAssignment(_) => MessageKind::FieldAssignment,
        }
    }

    /// The entry carried by an `Entry` or `OldData` message.
    pub fn entry(&self) -> Option<&Arc<Entry>> {
        match self {
            Message::Entry(e) | Message::OldData(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_transaction_marker(&self) -> bool {
        matches!(self, Message::TransactionStart | Message::TransactionEnd)
    }

    pub fn to_wire(&self) -> WireMessage {
        match self {
            Message::Entry(e) => WireMessage::Entry {
                key_id: e.key().id(),
                value: e.value().to_wire(),
            },
            Message::OldData(e) => WireMessage::OldData {
                key_id: e.key().id(),
                value: e.value().to_wire(),
            },
            Message::Confirmation(n) => WireMessage::Confirmation(*n),
            Message::Denial(n) => WireMessage::Denial(*n),
            Message::TransactionStart | Message::TransactionEnd => WireMessage::Transaction,
            Message::TableRequest { name, table } => WireMessage::TableRequest {
                name: name.clone(),
                table_id: table.id(),
            },
            Message::TableAssignment {
                table,
                alternate_id,
            } => WireMessage::TableAssignment {
                target_id: *alternate_id,
                table_id: table.id(),
            },
            Message::FieldAssignment(key) => WireMessage::FieldAssignment {
                table_id: key.table_id(),
                name: key.name().to_string(),
                key_id: key.id(),
            },
        }
    }

    pub fn encode(&self, buf: &mut impl bytes::BufMut) -> Result<(), ProtocolError> {
        self.to_wire().encode(buf)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Entry(e) => write!(f, "Entry({}={:?})", e.key().name(), e.value()),
            Message::OldData(e) => write!(f, "OldData({}={:?})", e.key().name(), e.value()),
            Message::Confirmation(n) => write!(f, "Confirmation({n})"),
            Message::Denial(n) => write!(f, "Denial({n})"),
            Message::TransactionStart => write!(f, "TransactionStart"),
            Message::TransactionEnd => write!(f, "TransactionEnd"),
            Message::TableRequest { name, table } => {
                write!(f, "TableRequest({name:?}, #{})", table.id())
            }
            Message::TableAssignment {
                table,
                alternate_id,
            } => write!(f, "TableAssignment(#{} -> {alternate_id})", table.id()),
            Message::FieldAssignment(key) => {
                write!(f, "FieldAssignment(#{}.{})", key.table_id(), key.name())
            }
        }
    }
}
