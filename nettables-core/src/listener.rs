//! Listener registries.
//!
//! Registration returns a [`ListenerId`]; the caller unregisters with
//! [`Table::remove_listener`](crate::Table::remove_listener). Dispatch clones
//! the targets out of the registry first, so callbacks run without the
//! registry lock and may register or remove listeners themselves.

use crate::table::Table;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Handle for an installed listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A change observed on one key.
pub struct ValueEvent<'a> {
    pub table: &'a Table,
    pub key: &'a str,
    pub value: &'a Value,
    /// Settled by the server, as opposed to a provisional local write.
    pub confirmed: bool,
    /// The key had no value before this change.
    pub added: bool,
}

pub type ValueListener = Arc<dyn Fn(&ValueEvent<'_>) + Send + Sync>;

/// Called with `true` when a table gains its first connection and `false`
/// when it loses its last one.
pub type ConnectionListener = Arc<dyn Fn(&Table, bool) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    by_name: HashMap<String, Vec<(ListenerId, ValueListener)>>,
    wildcard: Vec<(ListenerId, ValueListener)>,
    addition: Vec<(ListenerId, ValueListener)>,
    connection: Vec<(ListenerId, ConnectionListener)>,
}

impl Listeners {
    fn allocate(&mut self) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_named(&mut self, name: &str, listener: ValueListener) -> ListenerId {
        let id = self.allocate();
        self.by_name
            .entry(name.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    pub fn add_wildcard(&mut self, listener: ValueListener) -> ListenerId {
        let id = self.allocate();
        self.wildcard.push((id, listener));
        id
    }

    pub fn add_addition(&mut self, listener: ValueListener) -> ListenerId {
        let id = self.allocate();
        self.addition.push((id, listener));
        id
    }

    pub fn add_connection(&mut self, listener: ConnectionListener) -> ListenerId {
        let id = self.allocate();
        self.connection.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        for list in self.by_name.values_mut() {
            removed |= remove_from(list, id);
        }
        self.by_name.retain(|_, list| !list.is_empty());
        removed |= remove_from(&mut self.wildcard, id);
        removed |= remove_from(&mut self.addition, id);
        removed |= remove_from(&mut self.connection, id);
        removed
    }

    /// Per-name listeners, then wildcard, then addition listeners for new keys.
    pub fn value_targets(&self, key: &str, added: bool) -> Vec<ValueListener> {
        let mut targets: Vec<ValueListener> = self
            .by_name
            .get(key)
            .into_iter()
            .flatten()
            .map(|(_, l)| l.clone())
            .collect();
        targets.extend(self.wildcard.iter().map(|(_, l)| l.clone()));
        if added {
            targets.extend(self.addition.iter().map(|(_, l)| l.clone()));
        }
        targets
    }

    pub fn connection_targets(&self) -> Vec<ConnectionListener> {
        self.connection.iter().map(|(_, l)| l.clone()).collect()
    }
}

fn remove_from<T>(list: &mut Vec<(ListenerId, T)>, id: ListenerId) -> bool {
    let before = list.len();
    list.retain(|(lid, _)| *lid != id);
    list.len() != before
}
