//! Id allocation and lookup for keys and tables.
//!
//! One arena is shared by every table and connection of a process. Key ids
//! and table ids are allocated from separate counters, each behind its own
//! lock, and never reused. Keys are indexed weakly so the index never keeps a
//! key alive; tables are indexed by id from just before a connection names
//! them to its peer until their last connection goes away, and by name for
//! the lifetime of the arena.

use crate::key::Key;
use crate::table::Table;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// The part a process plays on the network. Fixed for the arena's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Authority: accepts peers and may deny conflicting writes.
    Server,
    /// Connects to one server; local writes are provisional until confirmed.
    Client,
}

impl Role {
    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

pub struct Arena {
    role: Role,
    next_key_id: Mutex<u32>,
    keys: DashMap<u32, Weak<Key>>,
    next_table_id: Mutex<u32>,
    tables: DashMap<u32, Weak<Table>>,
    named: DashMap<String, Arc<Table>>,
}

impl Arena {
    pub fn new(role: Role) -> Arc<Self> {
        Arc::new(Self {
            role,
            next_key_id: Mutex::new(0),
            keys: DashMap::new(),
            next_table_id: Mutex::new(0),
            tables: DashMap::new(),
            named: DashMap::new(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Creates a key with the next free id and indexes it.
    pub(crate) fn register_key(&self, name: &str, table_id: u32, table: Weak<Table>) -> Arc<Key> {
        let id = {
            let mut next = self.next_key_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        let key = Arc::new(Key::new(id, name, table_id, table));
        self.keys.insert(id, Arc::downgrade(&key));
        key
    }

    /// Resolves a key id, pruning the index entry if the key is gone.
    pub fn key(&self, id: u32) -> Option<Arc<Key>> {
        let key = self.keys.get(&id).and_then(|k| k.upgrade());
        if key.is_none() {
            self.keys.remove(&id);
        }
        key
    }

    pub(crate) fn forget_key(&self, id: u32) {
        self.keys.remove(&id);
    }

    pub(crate) fn allocate_table_id(&self) -> u32 {
        let mut next = self.next_table_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// Indexes `table` by id. A connection calls this before the peer can
    /// learn the id, so a reply naming it always resolves.
    pub fn register_table(&self, table: &Arc<Table>) {
        self.tables.insert(table.id(), Arc::downgrade(table));
    }

    pub(crate) fn deregister_table(&self, id: u32) {
        self.tables.remove(&id);
    }

    /// Resolves a table that currently has at least one subscriber.
    pub fn table_by_id(&self, id: u32) -> Option<Arc<Table>> {
        self.tables.get(&id).and_then(|t| t.upgrade())
    }

    /// Returns the named root table, creating it on first use.
    pub fn table(self: &Arc<Self>, name: &str) -> Arc<Table> {
        self.named
            .entry(name.to_string())
            .or_insert_with(|| Table::new(self.clone(), Some(name.to_string())))
            .clone()
    }

    pub fn find_table(&self, name: &str) -> Option<Arc<Table>> {
        self.named.get(name).map(|t| t.clone())
    }

    pub fn named_tables(&self) -> Vec<Arc<Table>> {
        self.named.iter().map(|t| t.value().clone()).collect()
    }

    /// Creates an anonymous table, used as a sub-table value.
    pub fn create_table(self: &Arc<Self>) -> Arc<Table> {
        Table::new(self.clone(), None)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}
