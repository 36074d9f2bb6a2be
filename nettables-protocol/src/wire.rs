//! Wire-level messages.
//!
//! Every id in a [`WireMessage`] is in the sender's namespace unless noted;
//! the receiving connection maps it onto its own keys and tables.
//!
//! ```text
//! Entry            id(ID key) value
//! OldData          OLD_DATA id(ID key) value
//! FieldAssignment  ASSIGNMENT id(TABLE_ID table) string id(ID key)
//! TableRequest     TABLE_REQUEST string id(TABLE_ID table)
//! TableAssignment  id(TABLE_ID receiver's table) id(TABLE_ID sender's table)
//! Transaction      TRANSACTION
//! Confirmation     run of 001xxxxx
//! Denial           run of 0001xxxx
//! Ping             0x3F
//!
//! value            STRING string | INT i32 | DOUBLE f64 | BOOLEAN_FALSE
//!                  | BOOLEAN_TRUE | TABLE id(TABLE_ID table)
//! ```

use crate::codec::{
    get_f64, get_i32, get_id, get_id_after, get_run_after, get_string, get_u8, put_id, put_run,
    put_string,
};
use crate::error::ProtocolError;
use crate::tag;
use bytes::BufMut;

/// A typed payload as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Boolean(bool),
    Integer(i32),
    Double(f64),
    String(String),
    /// Sub-table, by the sender's table id.
    Table(u32),
}

impl WireValue {
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), ProtocolError> {
        match self {
            WireValue::Boolean(false) => buf.put_u8(tag::BOOLEAN_FALSE),
            WireValue::Boolean(true) => buf.put_u8(tag::BOOLEAN_TRUE),
            WireValue::Integer(v) => {
                buf.put_u8(tag::INT);
                buf.put_i32(*v);
            }
            WireValue::Double(v) => {
                buf.put_u8(tag::DOUBLE);
                buf.put_f64(*v);
            }
            WireValue::String(v) => {
                buf.put_u8(tag::STRING);
                put_string(buf, v)?;
            }
            WireValue::Table(id) => {
                buf.put_u8(tag::TABLE);
                put_id(buf, tag::TABLE_ID, *id);
            }
        }
        Ok(())
    }

    pub fn decode(src: &mut &[u8]) -> Result<Self, ProtocolError> {
        let kind = get_u8(src)?;
        let value = match kind {
            tag::BOOLEAN_FALSE => WireValue::Boolean(false),
            tag::BOOLEAN_TRUE => WireValue::Boolean(true),
            tag::INT => WireValue::Integer(get_i32(src)?),
            tag::DOUBLE => WireValue::Double(get_f64(src)?),
            tag::STRING => WireValue::String(get_string(src)?),
            tag::TABLE => WireValue::Table(get_id(src, tag::TABLE_ID)?),
            other => return Err(ProtocolError::UnexpectedType(other)),
        };
        Ok(value)
    }
}

/// One message of the table-sync protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Entry {
        key_id: u32,
        value: WireValue,
    },
    OldData {
        key_id: u32,
        value: WireValue,
    },
    FieldAssignment {
        table_id: u32,
        name: String,
        key_id: u32,
    },
    TableRequest {
        name: String,
        table_id: u32,
    },
    TableAssignment {
        /// The receiver's own id for the table.
        target_id: u32,
        /// The sender's id for the same table.
        table_id: u32,
    },
    /// Opens or closes a transaction; the meaning alternates.
    Transaction,
    Confirmation(u32),
    Denial(u32),
    Ping,
}

impl WireMessage {
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), ProtocolError> {
        match self {
            WireMessage::Entry { key_id, value } => {
                put_id(buf, tag::ID, *key_id);
                value.encode(buf)?;
            }
            WireMessage::OldData { key_id, value } => {
                buf.put_u8(tag::OLD_DATA);
                put_id(buf, tag::ID, *key_id);
                value.encode(buf)?;
            }
            WireMessage::FieldAssignment {
                table_id,
                name,
                key_id,
            } => {
                buf.put_u8(tag::ASSIGNMENT);
                put_id(buf, tag::TABLE_ID, *table_id);
                put_string(buf, name)?;
                put_id(buf, tag::ID, *key_id);
            }
            WireMessage::TableRequest { name, table_id } => {
                buf.put_u8(tag::TABLE_REQUEST);
                put_string(buf, name)?;
                put_id(buf, tag::TABLE_ID, *table_id);
            }
            WireMessage::TableAssignment {
                target_id,
                table_id,
            } => {
                put_id(buf, tag::TABLE_ID, *target_id);
                put_id(buf, tag::TABLE_ID, *table_id);
            }
            WireMessage::Transaction => buf.put_u8(tag::TRANSACTION),
            WireMessage::Confirmation(count) => put_run(buf, tag::CONFIRMATION, *count),
            WireMessage::Denial(count) => put_run(buf, tag::DENIAL, *count),
            WireMessage::Ping => buf.put_u8(tag::PING),
        }
        Ok(())
    }

    /// Decodes one message, advancing `src` past it.
    pub fn decode(src: &mut &[u8]) -> Result<Self, ProtocolError> {
        let byte = get_u8(src)?;
        let message = if tag::in_range(tag::ID, byte) {
            WireMessage::Entry {
                key_id: get_id_after(src, tag::ID, byte)?,
                value: WireValue::decode(src)?,
            }
        } else if tag::in_range(tag::TABLE_ID, byte) {
            WireMessage::TableAssignment {
                target_id: get_id_after(src, tag::TABLE_ID, byte)?,
                table_id: get_id(src, tag::TABLE_ID)?,
            }
        } else if byte == tag::PING {
            WireMessage::Ping
        } else if tag::in_range(tag::CONFIRMATION, byte) {
            WireMessage::Confirmation(get_run_after(src, tag::CONFIRMATION, byte)?)
        } else if tag::in_range(tag::DENIAL, byte) {
            WireMessage::Denial(get_run_after(src, tag::DENIAL, byte)?)
        } else {
            match byte {
                tag::ASSIGNMENT => WireMessage::FieldAssignment {
                    table_id: get_id(src, tag::TABLE_ID)?,
                    name: get_string(src)?,
                    key_id: get_id(src, tag::ID)?,
                },
                tag::OLD_DATA => WireMessage::OldData {
                    key_id: get_id(src, tag::ID)?,
                    value: WireValue::decode(src)?,
                },
                tag::TRANSACTION => WireMessage::Transaction,
                tag::TABLE_REQUEST => WireMessage::TableRequest {
                    name: get_string(src)?,
                    table_id: get_id(src, tag::TABLE_ID)?,
                },
                other => return Err(ProtocolError::UnexpectedTag(other)),
            }
        };
        Ok(message)
    }
}
