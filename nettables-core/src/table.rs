//! Tables: the synchronized key/value maps.
//!
//! A table owns its keys, the set of connections subscribed to it, a nested
//! transaction buffer and its listener registry. Three locks guard it:
//!
//! - `commit` (reentrant) serializes commits, subscription changes and
//!   listener dispatch. Listeners run while it is held and may write back
//!   into the same table.
//! - `state` guards keys, subscribers and the transaction buffer. It is never
//!   held while listeners run.
//! - `listeners` guards the listener registry only.

use crate::arena::{Arena, Role};
use crate::error::CoreError;
use crate::key::Key;
use crate::listener::{ListenerId, Listeners, ValueEvent};
use crate::message::Message;
use crate::value::{ConnectionId, Entry, Value};
use nettables_protocol::codec::check_string;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A peer that receives a table's outbound messages.
pub trait Subscriber: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    fn offer(&self, message: Message);

    /// Offers a batch that must reach the peer contiguously.
    fn offer_all(&self, messages: &[Message]) {
        for message in messages {
            self.offer(message.clone());
        }
    }
}

#[derive(Default)]
struct TableState {
    keys: HashMap<String, Arc<Key>>,
    connections: Vec<Arc<dyn Subscriber>>,
    transaction_depth: u32,
    transaction: Vec<Message>,
}

pub struct Table {
    id: u32,
    name: Option<String>,
    role: Role,
    arena: Weak<Arena>,
    this: Weak<Table>,
    commit: ReentrantMutex<()>,
    state: Mutex<TableState>,
    listeners: Mutex<Listeners>,
}

impl Table {
    pub(crate) fn new(arena: Arc<Arena>, name: Option<String>) -> Arc<Self> {
        let id = arena.allocate_table_id();
        Arc::new_cyclic(|this| Self {
            id,
            name,
            role: arena.role(),
            arena: Arc::downgrade(&arena),
            this: this.clone(),
            commit: ReentrantMutex::new(()),
            state: Mutex::new(TableState::default()),
            listeners: Mutex::new(Listeners::default()),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The root name, or `None` for a sub-table.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn arena(&self) -> Result<Arc<Arena>, CoreError> {
        self.arena
            .upgrade()
            .ok_or(CoreError::ArenaClosed { table: self.id })
    }

    // ---- keys -------------------------------------------------------------

    /// Returns the key for `name`, creating it and announcing it to every
    /// subscribed connection if it does not exist yet.
    pub fn get_or_create_key(&self, name: &str) -> Result<Arc<Key>, CoreError> {
        if name.is_empty() {
            return Err(CoreError::EmptyKey);
        }
        let mut state = self.state.lock();
        if let Some(key) = state.keys.get(name) {
            return Ok(key.clone());
        }
        check_sendable(name, name)?;
        let key = self.arena()?.register_key(name, self.id, self.this.clone());
        state.keys.insert(name.to_string(), key.clone());
        for connection in &state.connections {
            connection.offer(Message::FieldAssignment(key.clone()));
        }
        Ok(key)
    }

    pub fn key(&self, name: &str) -> Option<Arc<Key>> {
        self.state.lock().keys.get(name).cloned()
    }

    /// Names of the keys that currently hold a value, sorted.
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .keys
            .values()
            .filter(|k| k.entry().is_some())
            .map(|k| k.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get_entry(name).is_some()
    }

    // ---- reads ------------------------------------------------------------

    pub fn get_entry(&self, name: &str) -> Option<Arc<Entry>> {
        self.key(name).and_then(|k| k.entry())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.get_entry(name).map(|e| e.value().clone())
    }

    pub fn get_boolean(&self, name: &str) -> Result<bool, CoreError> {
        self.get_typed(name, "boolean", Value::as_bool)
    }

    pub fn get_int(&self, name: &str) -> Result<i32, CoreError> {
        self.get_typed(name, "integer", Value::as_int)
    }

    pub fn get_double(&self, name: &str) -> Result<f64, CoreError> {
        self.get_typed(name, "double", Value::as_double)
    }

    pub fn get_string(&self, name: &str) -> Result<String, CoreError> {
        self.get_typed(name, "string", |v| v.as_str().map(str::to_string))
    }

    pub fn get_table(&self, name: &str) -> Result<Arc<Table>, CoreError> {
        self.get_typed(name, "table", |v| v.as_table().cloned())
    }

    fn get_typed<T>(
        &self,
        name: &str,
        expected: &'static str,
        extract: impl FnOnce(&Value) -> Option<T>,
    ) -> Result<T, CoreError> {
        let value = self.get(name).ok_or_else(|| CoreError::NotFound {
            key: name.to_string(),
        })?;
        extract(&value).ok_or_else(|| CoreError::TypeMismatch {
            key: name.to_string(),
            expected,
            actual: value.type_name(),
        })
    }

    // ---- writes -----------------------------------------------------------

    /// Stores `value` under `name`, or buffers it if a transaction is open.
    pub fn put(&self, name: &str, value: impl Into<Value>) -> Result<(), CoreError> {
        let value = value.into();
        if let Value::String(text) = &value {
            check_sendable(name, text)?;
        }
        let key = self.get_or_create_key(name)?;
        let message = Message::Entry(Entry::new(key, value, None));
        {
            let mut state = self.state.lock();
            if state.transaction_depth > 0 {
                state.transaction.push(message);
                return Ok(());
            }
        }
        self.process_transaction(self.role.is_server(), vec![message]);
        Ok(())
    }

    pub fn put_boolean(&self, name: &str, value: bool) -> Result<(), CoreError> {
        self.put(name, value)
    }

    pub fn put_int(&self, name: &str, value: i32) -> Result<(), CoreError> {
        self.put(name, value)
    }

    pub fn put_double(&self, name: &str, value: f64) -> Result<(), CoreError> {
        self.put(name, value)
    }

    pub fn put_string(&self, name: &str, value: impl Into<String>) -> Result<(), CoreError> {
        self.put(name, value.into())
    }

    pub fn put_table(&self, name: &str, value: Arc<Table>) -> Result<(), CoreError> {
        self.put(name, value)
    }

    // ---- paths ------------------------------------------------------------

    /// Reads `a.b.c` by walking sub-tables `a` and `b`.
    pub fn get_path(self: &Arc<Self>, path: &str) -> Result<Value, CoreError> {
        let (parents, leaf) = split_path(path)?;
        let mut table = self.clone();
        for segment in parents {
            table = table.get_table(segment)?;
        }
        table.get(leaf).ok_or_else(|| CoreError::NotFound {
            key: path.to_string(),
        })
    }

    /// Writes `a.b.c`, creating sub-tables `a` and `b` if they are missing.
    pub fn put_path(self: &Arc<Self>, path: &str, value: impl Into<Value>) -> Result<(), CoreError> {
        let (parents, leaf) = split_path(path)?;
        let mut table = self.clone();
        for segment in parents {
            table = match table.get(segment) {
                Some(Value::Table(child)) => child,
                Some(other) => {
                    return Err(CoreError::TypeMismatch {
                        key: segment.to_string(),
                        expected: "table",
                        actual: other.type_name(),
                    })
                }
                None => {
                    let child = self.arena()?.create_table();
                    table.put(segment, child.clone())?;
                    child
                }
            };
        }
        table.put(leaf, value)
    }

    // ---- transactions -----------------------------------------------------

    pub fn begin_transaction(&self) {
        let mut state = self.state.lock();
        state.transaction_depth += 1;
        if state.transaction_depth == 1 {
            state.transaction.clear();
            state.transaction.push(Message::TransactionStart);
        }
    }

    /// Closes one nesting level; the outermost close commits the buffer.
    pub fn end_transaction(&self) -> Result<(), CoreError> {
        let queue = {
            let mut state = self.state.lock();
            if state.transaction_depth == 0 {
                return Err(CoreError::NoTransaction { table: self.id });
            }
            state.transaction_depth -= 1;
            if state.transaction_depth > 0 {
                return Ok(());
            }
            let mut queue = std::mem::take(&mut state.transaction);
            if !queue.iter().any(|m| matches!(m, Message::Entry(_))) {
                return Ok(());
            }
            queue.push(Message::TransactionEnd);
            queue
        };
        self.process_transaction(self.role.is_server(), queue);
        Ok(())
    }

    pub fn transaction_depth(&self) -> u32 {
        self.state.lock().transaction_depth
    }

    /// Broadcasts `queue` to every subscriber except the one the first entry
    /// came from, applies its entries, then notifies listeners: all
    /// additions first, then all changes.
    pub fn process_transaction(&self, confirmed: bool, queue: Vec<Message>) {
        let _commit = self.commit.lock();

        let source = queue
            .iter()
            .find_map(|m| match m {
                Message::Entry(entry) => Some(entry.source()),
                _ => None,
            })
            .flatten();
        let connections = self.state.lock().connections.clone();
        for connection in &connections {
            if source != Some(connection.connection_id()) {
                connection.offer_all(&queue);
            }
        }

        let mut added = Vec::new();
        let mut changed = Vec::new();
        {
            let _state = self.state.lock();
            for message in &queue {
                if let Message::Entry(entry) = message {
                    match entry.key().replace(entry.clone()) {
                        None => added.push(entry.clone()),
                        Some(_) => changed.push(entry.clone()),
                    }
                }
            }
        }

        for entry in &added {
            self.notify(entry, confirmed, true);
        }
        for entry in &changed {
            self.notify(entry, confirmed, false);
        }
    }

    /// Re-notifies listeners with `confirmed = true` for each entry that is
    /// still the current value of its key.
    pub fn confirm(&self, entries: &[Arc<Entry>]) {
        let _commit = self.commit.lock();
        for entry in entries {
            let current = entry.key().entry();
            if current.is_some_and(|c| Arc::ptr_eq(&c, entry)) {
                self.notify(entry, true, false);
            }
        }
    }

    fn notify(&self, entry: &Entry, confirmed: bool, added: bool) {
        let targets = self
            .listeners
            .lock()
            .value_targets(entry.key().name(), added);
        if targets.is_empty() {
            return;
        }
        let event = ValueEvent {
            table: self,
            key: entry.key().name(),
            value: entry.value(),
            confirmed,
            added,
        };
        for listener in targets {
            listener(&event);
        }
    }

    // ---- subscribers ------------------------------------------------------

    /// Subscribes `connection` and sends it the current contents: a
    /// FieldAssignment per key, then every entry, without a transaction
    /// wrapper. Returns false if it was already subscribed.
    pub fn add_connection(self: &Arc<Self>, connection: Arc<dyn Subscriber>) -> bool {
        let _commit = self.commit.lock();

        let (first, entries) = {
            let mut state = self.state.lock();
            let id = connection.connection_id();
            if state.connections.iter().any(|c| c.connection_id() == id) {
                return false;
            }
            state.connections.push(connection.clone());

            let mut keys: Vec<&Arc<Key>> = state.keys.values().collect();
            keys.sort_by_key(|k| k.id());
            for key in &keys {
                connection.offer(Message::FieldAssignment((*key).clone()));
            }
            let entries: Vec<Message> = keys
                .iter()
                .filter_map(|k| k.entry())
                .map(Message::Entry)
                .collect();
            (state.connections.len() == 1, entries)
        };

        if first {
            if let Some(arena) = self.arena.upgrade() {
                arena.register_table(self);
            }
            tracing::debug!("table #{} gained its first connection", self.id);
            self.notify_connection(true);
        }
        if !entries.is_empty() {
            connection.offer_all(&entries);
        }
        true
    }

    /// Unsubscribes a connection. Returns false if it was not subscribed.
    pub fn remove_connection(&self, id: ConnectionId) -> bool {
        let _commit = self.commit.lock();

        let last = {
            let mut state = self.state.lock();
            let before = state.connections.len();
            state.connections.retain(|c| c.connection_id() != id);
            if state.connections.len() == before {
                return false;
            }
            state.connections.is_empty()
        };

        if last {
            if let Some(arena) = self.arena.upgrade() {
                arena.deregister_table(self.id);
            }
            tracing::debug!("table #{} lost its last connection", self.id);
            self.notify_connection(false);
        }
        true
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    fn notify_connection(&self, connected: bool) {
        let targets = self.listeners.lock().connection_targets();
        for listener in targets {
            listener(self, connected);
        }
    }

    // ---- listeners --------------------------------------------------------

    /// Listens for changes to one key.
    pub fn add_listener<F>(&self, name: &str, listener: F) -> ListenerId
    where
        F: Fn(&ValueEvent<'_>) + Send + Sync + 'static,
    {
        self.listeners.lock().add_named(name, Arc::new(listener))
    }

    /// Listens for changes to every key.
    pub fn add_wildcard_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ValueEvent<'_>) + Send + Sync + 'static,
    {
        self.listeners.lock().add_wildcard(Arc::new(listener))
    }

    /// Listens for keys receiving their first value.
    pub fn add_addition_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ValueEvent<'_>) + Send + Sync + 'static,
    {
        self.listeners.lock().add_addition(Arc::new(listener))
    }

    pub fn add_connection_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Table, bool) + Send + Sync + 'static,
    {
        self.listeners.lock().add_connection(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.lock().remove(id)
    }
}

/// Rejects a string the wire format cannot carry before it reaches a queue.
fn check_sendable(key: &str, text: &str) -> Result<(), CoreError> {
    check_string(text).map_err(|source| CoreError::Unencodable {
        key: key.to_string(),
        source,
    })
}

fn split_path(path: &str) -> Result<(Vec<&str>, &str), CoreError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::InvalidPath {
            path: path.to_string(),
        });
    }
    let leaf = segments.pop().ok_or_else(|| CoreError::InvalidPath {
        path: path.to_string(),
    })?;
    Ok((segments, leaf))
}

impl Drop for Table {
    fn drop(&mut self) {
        let arena = self.arena.upgrade();
        for key in self.state.get_mut().keys.values() {
            key.clear();
            if let Some(arena) = &arena {
                arena.forget_key(key.id());
            }
        }
        if let Some(arena) = arena {
            arena.deregister_table(self.id);
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::testing::TestSubscriber;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn server_table() -> (Arc<Arena>, Arc<Table>) {
        let arena = Arena::new(Role::Server);
        let table = arena.table("T");
        (arena, table)
    }

    #[test]
    fn test_put_and_typed_get() {
        let (_arena, table) = server_table();
        table.put_int("count", 3).unwrap();
        table.put_double("speed", 1.5).unwrap();
        table.put_boolean("enabled", true).unwrap();
        table.put_string("mode", "auto").unwrap();

        assert_eq!(table.get_int("count").unwrap(), 3);
        assert_eq!(table.get_double("speed").unwrap(), 1.5);
        assert!(table.get_boolean("enabled").unwrap());
        assert_eq!(table.get_string("mode").unwrap(), "auto");
        assert_eq!(table.keys(), vec!["count", "enabled", "mode", "speed"]);
    }

    #[test]
    fn test_typed_get_errors() {
        let (_arena, table) = server_table();
        table.put("x", "text").unwrap();

        assert!(matches!(
            table.get_int("missing"),
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            table.get_int("x"),
            Err(CoreError::TypeMismatch {
                expected: "integer",
                actual: "string",
                ..
            })
        ));
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let (_arena, table) = server_table();
        assert!(matches!(table.put("", 1), Err(CoreError::EmptyKey)));
    }

    #[test]
    fn test_unsendable_strings_are_rejected_before_queueing() {
        let (_arena, table) = server_table();
        let subscriber = TestSubscriber::new(7);
        table.add_connection(subscriber.clone());

        let long_with_nul = format!("{}\0", "y".repeat(300));
        assert!(matches!(
            table.put("bad", long_with_nul.as_str()),
            Err(CoreError::Unencodable { .. })
        ));
        assert!(matches!(
            table.get_or_create_key(&long_with_nul),
            Err(CoreError::Unencodable { .. })
        ));
        assert!(table.key("bad").is_none());
        assert!(subscriber.drain().is_empty());

        table.begin_transaction();
        assert!(table.put("bad", long_with_nul).is_err());
        table.end_transaction().unwrap();
        assert!(subscriber.drain().is_empty());

        // Short strings carry NUL fine.
        table.put("ok", "a\0b").unwrap();
        assert_eq!(table.get_string("ok").unwrap(), "a\0b");
    }

    #[test]
    fn test_key_without_value_is_not_listed() {
        let (_arena, table) = server_table();
        table.get_or_create_key("pending").unwrap();
        assert!(!table.contains_key("pending"));
        assert!(table.keys().is_empty());
    }

    #[test]
    fn test_end_transaction_without_begin() {
        let (_arena, table) = server_table();
        assert!(matches!(
            table.end_transaction(),
            Err(CoreError::NoTransaction { .. })
        ));
    }

    #[test]
    fn test_transaction_is_invisible_until_committed() {
        let (_arena, table) = server_table();
        table.begin_transaction();
        table.put("a", 1).unwrap();
        table.begin_transaction();
        table.put("b", 2).unwrap();
        table.end_transaction().unwrap();

        assert!(table.get("a").is_none());
        assert_eq!(table.transaction_depth(), 1);

        table.end_transaction().unwrap();
        assert_eq!(table.get_int("a").unwrap(), 1);
        assert_eq!(table.get_int("b").unwrap(), 2);
        assert_eq!(table.transaction_depth(), 0);
    }

    #[test]
    fn test_listener_observes_whole_transaction() {
        let (_arena, table) = server_table();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            table.add_listener("a", move |event| {
                let b = event.table.get("b").and_then(|v| v.as_int());
                seen.lock().push((event.value.as_int(), b));
            });
        }

        table.begin_transaction();
        table.put("a", 1).unwrap();
        table.put("b", 2).unwrap();
        table.end_transaction().unwrap();

        assert_eq!(*seen.lock(), vec![(Some(1), Some(2))]);
    }

    #[test]
    fn test_additions_fire_before_changes() {
        let (_arena, table) = server_table();
        table.put("old", 1).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = order.clone();
            table.add_wildcard_listener(move |event| {
                order.lock().push((event.key.to_string(), event.added));
            });
        }

        table.begin_transaction();
        table.put("old", 2).unwrap();
        table.put("new", 1).unwrap();
        table.end_transaction().unwrap();

        assert_eq!(
            *order.lock(),
            vec![("new".to_string(), true), ("old".to_string(), false)]
        );
    }

    #[test]
    fn test_addition_listener_only_sees_new_keys() {
        let (_arena, table) = server_table();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            table.add_addition_listener(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        table.put("x", 1).unwrap();
        table.put("x", 2).unwrap();
        table.put("y", 1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_removed_listener_is_silent() {
        let (_arena, table) = server_table();
        let count = Arc::new(AtomicUsize::new(0));
        let id = {
            let count = count.clone();
            table.add_listener("x", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        table.put("x", 1).unwrap();
        assert!(table.remove_listener(id));
        table.put("x", 2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_write_back() {
        let (_arena, table) = server_table();
        table.add_listener("input", |event| {
            let doubled = event.value.as_int().unwrap_or_default() * 2;
            event.table.put("output", doubled).unwrap();
        });
        table.put("input", 21).unwrap();
        assert_eq!(table.get_int("output").unwrap(), 42);
    }

    #[test]
    fn test_local_writes_are_provisional_on_a_client() {
        let arena = Arena::new(Role::Client);
        let table = arena.table("T");
        let flags = Arc::new(Mutex::new(Vec::new()));
        {
            let flags = flags.clone();
            table.add_listener("x", move |event| flags.lock().push(event.confirmed));
        }

        table.put("x", 1).unwrap();
        let entry = table.get_entry("x").unwrap();
        table.confirm(&[entry]);

        assert_eq!(*flags.lock(), vec![false, true]);
    }

    #[test]
    fn test_confirm_skips_superseded_entries() {
        let arena = Arena::new(Role::Client);
        let table = arena.table("T");
        table.put("x", 1).unwrap();
        let stale = table.get_entry("x").unwrap();
        table.put("x", 2).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            table.add_listener("x", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        table.confirm(&[stale]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_initial_sync_burst() {
        let (arena, table) = server_table();
        table.put("a", 1).unwrap();
        table.put("b", "two").unwrap();

        let subscriber = TestSubscriber::new(7);
        assert!(table.add_connection(subscriber.clone()));
        assert!(!table.add_connection(subscriber.clone()));

        let kinds: Vec<_> = subscriber.drain().iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::FieldAssignment,
                MessageKind::FieldAssignment,
                MessageKind::Entry,
                MessageKind::Entry,
            ]
        );
        assert!(Arc::ptr_eq(&arena.table_by_id(table.id()).unwrap(), &table));
    }

    #[test]
    fn test_new_keys_are_announced_to_subscribers() {
        let (_arena, table) = server_table();
        let subscriber = TestSubscriber::new(1);
        table.add_connection(subscriber.clone());

        table.put("x", 1).unwrap();
        let kinds: Vec<_> = subscriber.drain().iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec![MessageKind::FieldAssignment, MessageKind::Entry]);
    }

    #[test]
    fn test_transaction_is_broadcast_except_to_source() {
        let (_arena, table) = server_table();
        let origin = TestSubscriber::new(1);
        let other = TestSubscriber::new(2);
        table.add_connection(origin.clone());
        table.add_connection(other.clone());

        let a = table.get_or_create_key("a").unwrap();
        let b = table.get_or_create_key("b").unwrap();
        origin.drain();
        other.drain();

        table.process_transaction(
            true,
            vec![
                Message::TransactionStart,
                Message::Entry(Entry::new(a, Value::Integer(1), Some(1))),
                Message::Entry(Entry::new(b, Value::Integer(2), Some(1))),
                Message::TransactionEnd,
            ],
        );

        assert!(origin.drain().is_empty());
        let kinds: Vec<_> = other.drain().iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::TransactionStart,
                MessageKind::Entry,
                MessageKind::Entry,
                MessageKind::TransactionEnd,
            ]
        );
        assert_eq!(table.get_int("b").unwrap(), 2);
    }

    #[test]
    fn test_connection_listeners_fire_on_first_and_last() {
        let (arena, table) = server_table();
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            table.add_connection_listener(move |_, connected| events.lock().push(connected));
        }

        table.add_connection(TestSubscriber::new(1));
        table.add_connection(TestSubscriber::new(2));
        assert!(table.remove_connection(1));
        assert!(!table.remove_connection(1));
        assert!(table.remove_connection(2));

        assert_eq!(*events.lock(), vec![true, false]);
        assert!(arena.table_by_id(table.id()).is_none());
        assert_eq!(table.connection_count(), 0);
    }

    #[test]
    fn test_paths() {
        let (_arena, table) = server_table();
        table.put_path("drive.left.speed", 0.5).unwrap();

        let drive = table.get_table("drive").unwrap();
        let left = drive.get_table("left").unwrap();
        assert_eq!(left.get_double("speed").unwrap(), 0.5);
        assert_eq!(table.get_path("drive.left.speed").unwrap(), Value::Double(0.5));

        table.put_path("drive.left.speed", 0.75).unwrap();
        assert!(Arc::ptr_eq(&table.get_table("drive").unwrap(), &drive));
        assert_eq!(left.get_double("speed").unwrap(), 0.75);
    }

    #[test]
    fn test_path_errors() {
        let (_arena, table) = server_table();
        table.put("scalar", 1).unwrap();
        assert!(matches!(
            table.put_path("a..b", 1),
            Err(CoreError::InvalidPath { .. })
        ));
        assert!(matches!(
            table.put_path("scalar.x", 1),
            Err(CoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            table.get_path("nope.x"),
            Err(CoreError::NotFound { .. })
        ));
    }
}
