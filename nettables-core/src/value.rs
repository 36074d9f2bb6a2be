//! Typed values and the entries that carry them.

use crate::key::Key;
use crate::table::Table;
use nettables_protocol::WireValue;
use std::fmt;
use std::sync::Arc;

/// Identifies the connection that produced an entry.
pub type ConnectionId = u64;

/// A value stored under a key.
#[derive(Clone)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Double(f64),
    String(String),
    Table(Arc<Table>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Table(_) => "table",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Arc<Table>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Converts to the wire form, naming sub-tables by their local id.
    pub fn to_wire(&self) -> WireValue {
        match self {
            Value::Boolean(v) => WireValue::Boolean(*v),
            Value::Integer(v) => WireValue::Integer(*v),
            Value::Double(v) => WireValue::Double(*v),
            Value::String(v) => WireValue::String(v.clone()),
            Value::Table(t) => WireValue::Table(t.id()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "Boolean({v})"),
            Value::Integer(v) => write!(f, "Integer({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Table(t) => write!(f, "Table(#{})", t.id()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Table(t) => write!(f, "<table #{}>", t.id()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Arc<Table>> for Value {
    fn from(v: Arc<Table>) -> Self {
        Value::Table(v)
    }
}

/// An immutable value bound to its key.
///
/// `source` names the connection the value arrived on, so it is not echoed
/// back to that peer.
pub struct Entry {
    key: Arc<Key>,
    value: Value,
    source: Option<ConnectionId>,
}

impl Entry {
    pub fn new(key: Arc<Key>, value: Value, source: Option<ConnectionId>) -> Arc<Self> {
        Arc::new(Self { key, value, source })
    }

    pub fn key(&self) -> &Arc<Key> {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn source(&self) -> Option<ConnectionId> {
        self.source
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key.name())
            .field("value", &self.value)
            .field("source", &self.source)
            .finish()
    }
}
