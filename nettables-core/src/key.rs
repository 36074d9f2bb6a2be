//! Keys: stable, id-bearing slots inside a table.

use crate::table::Table;
use crate::value::Entry;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// A named slot in one table. Holds at most one entry.
pub struct Key {
    id: u32,
    name: String,
    table_id: u32,
    table: Weak<Table>,
    entry: Mutex<Option<Arc<Entry>>>,
}

impl Key {
    pub(crate) fn new(id: u32, name: &str, table_id: u32, table: Weak<Table>) -> Self {
        Self {
            id,
            name: name.to_string(),
            table_id,
            table,
            entry: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the owning table.
    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn table(&self) -> Option<Arc<Table>> {
        self.table.upgrade()
    }

    pub fn entry(&self) -> Option<Arc<Entry>> {
        self.entry.lock().clone()
    }

    /// Installs `entry`, returning the one it replaces.
    pub(crate) fn replace(&self, entry: Arc<Entry>) -> Option<Arc<Entry>> {
        self.entry.lock().replace(entry)
    }

    /// Drops the current entry, breaking the key/entry reference cycle.
    pub(crate) fn clear(&self) {
        self.entry.lock().take();
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("table_id", &self.table_id)
            .finish()
    }
}
