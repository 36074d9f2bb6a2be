//! One peer link.
//!
//! A connection runs three tasks over its socket: a reader that decodes and
//! applies incoming messages, a writer that drains the update queue, and a
//! watchdog. Any of them may close the connection; closing is idempotent and
//! unsubscribes it from every table.
//!
//! Ids on the wire belong to the sender. `field_map` and `table_map`
//! translate the peer's key and table ids into ours.

use crate::config::TimingConfig;
use crate::error::NodeError;
use crate::ledger::{Acknowledged, Ledger};
use crate::watchdog::Watchdog;
use bytes::BytesMut;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use nettables_core::{
    Arena, ConnectionId, Entry, Key, Message, Subscriber, Table, UpdateQueue, Value,
};
use nettables_protocol::{Decoder, WireMessage, WireValue};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Reader-side state of an incoming transaction.
#[derive(Default)]
struct ReadState {
    in_transaction: bool,
    deny_transaction: bool,
    /// Entries and OldData received inside the transaction, denied or not.
    received: u32,
    buffer: Vec<Arc<Entry>>,
    touched: Vec<Arc<Key>>,
}

pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    arena: Arc<Arena>,
    timing: TimingConfig,
    this: Weak<Connection>,
    queue: UpdateQueue,
    ledger: Mutex<Ledger>,
    watchdog: Watchdog,
    field_map: DashMap<u32, u32>,
    table_map: DashMap<u32, Arc<Table>>,
    tables: Mutex<Vec<Arc<Table>>>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        arena: Arc<Arena>,
        timing: TimingConfig,
    ) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new_cyclic(|this| Self {
            id,
            addr,
            arena,
            timing,
            this: this.clone(),
            queue: UpdateQueue::new(),
            ledger: Mutex::new(Ledger::new()),
            watchdog: Watchdog::new(),
            field_map: DashMap::new(),
            table_map: DashMap::new(),
            tables: Mutex::new(Vec::new()),
            closed,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Spawns the reader, writer and watchdog tasks over `stream`.
    pub fn start(self: &Arc<Self>, stream: TcpStream) {
        let (reader, writer) = stream.into_split();

        let conn = self.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.clone().read_loop(reader).await {
                tracing::warn!("[{}] Read failed: {}", conn.addr, e);
            }
            conn.close();
        });

        let conn = self.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.clone().write_loop(writer).await {
                tracing::warn!("[{}] Write failed: {}", conn.addr, e);
            }
            conn.close();
        });

        let conn = self.clone();
        tokio::spawn(async move {
            let mut closed = conn.closed.subscribe();
            tokio::select! {
                _ = closed.wait_for(|c| *c) => {}
                _ = conn.watchdog.expired(conn.timing.watchdog()) => {
                    tracing::warn!("[{}] Watchdog expired", conn.addr);
                    conn.close();
                }
            }
        });
    }

    /// Closes the connection and unsubscribes it from every table.
    pub fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let tables = std::mem::take(&mut *self.tables.lock());
        for table in &tables {
            table.remove_connection(self.id);
        }
        tracing::info!("[{}] Connection closed", self.addr);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|c| *c).await;
    }

    /// Asks the peer for the named table, then subscribes to it.
    pub fn request_table(&self, table: &Arc<Table>) {
        let Some(name) = table.name() else {
            return;
        };
        if self.is_subscribed(table) {
            return;
        }
        tracing::debug!("[{}] Requesting table '{}'", self.addr, name);
        self.arena.register_table(table);
        self.offer(Message::TableRequest {
            name: name.to_string(),
            table: table.clone(),
        });
        self.subscribe(table);
    }

    fn is_subscribed(&self, table: &Arc<Table>) -> bool {
        self.tables.lock().iter().any(|t| Arc::ptr_eq(t, table))
    }

    fn subscribe(&self, table: &Arc<Table>) {
        if self.is_closed() {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        if table.add_connection(this) {
            self.tables.lock().push(table.clone());
            if self.is_closed() {
                table.remove_connection(self.id);
            }
        }
    }

    /// Tables the connection is subscribed to.
    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.tables.lock().clone()
    }

    /// Messages waiting to be written.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Writes sent and not yet acknowledged by the peer.
    pub fn unacknowledged(&self) -> usize {
        self.ledger.lock().len()
    }

    // ---- reader -----------------------------------------------------------

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) -> Result<(), NodeError> {
        let mut closed = self.closed.subscribe();
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; self.timing.read_buffer];
        let mut state = ReadState::default();

        loop {
            let n = tokio::select! {
                _ = closed.wait_for(|c| *c) => return Ok(()),
                result = reader.read(&mut buf) => result?,
            };
            if n == 0 {
                tracing::debug!("[{}] Connection closed by peer", self.addr);
                return Ok(());
            }
            self.watchdog.feed();
            decoder.extend(&buf[..n]);

            while let Some(message) = decoder.decode_message()? {
                if message != WireMessage::Ping {
                    self.watchdog.activate();
                }
                tracing::debug!("[{}] Received {:?}", self.addr, message);
                self.handle(&mut state, message)?;
            }
        }
    }

    fn handle(&self, state: &mut ReadState, message: WireMessage) -> Result<(), NodeError> {
        match message {
            WireMessage::Entry { key_id, value } => self.receive_entry(state, key_id, value, false),
            WireMessage::OldData { key_id, value } => {
                self.receive_entry(state, key_id, value, true)
            }
            WireMessage::Confirmation(count) => self.acknowledge(count, true),
            WireMessage::Denial(count) => {
                if self.arena.role().is_server() {
                    return Err(NodeError::UnexpectedDenial);
                }
                self.acknowledge(count, false)
            }
            WireMessage::TableRequest { name, table_id } => {
                if !self.arena.role().is_server() {
                    return Err(NodeError::UnexpectedTableRequest);
                }
                let table = self.arena.table(&name);
                tracing::debug!("[{}] Table request '{}' -> #{}", self.addr, name, table.id());
                self.map_table(table_id, &table)?;
                self.offer(Message::TableAssignment {
                    table: table.clone(),
                    alternate_id: table_id,
                });
                self.subscribe(&table);
                Ok(())
            }
            WireMessage::TableAssignment {
                target_id,
                table_id,
            } => {
                let table = self
                    .arena
                    .table_by_id(target_id)
                    .ok_or(NodeError::UnknownTable(target_id))?;
                self.map_table(table_id, &table)
            }
            WireMessage::FieldAssignment {
                table_id,
                name,
                key_id,
            } => {
                let table = self
                    .table_map
                    .get(&table_id)
                    .map(|t| t.clone())
                    .ok_or(NodeError::UnknownTable(table_id))?;
                let key = table.get_or_create_key(&name)?;
                match self.field_map.entry(key_id) {
                    MapEntry::Occupied(e) if *e.get() != key.id() => {
                        Err(NodeError::Reassigned {
                            kind: "key",
                            id: key_id,
                        })
                    }
                    MapEntry::Occupied(_) => Ok(()),
                    MapEntry::Vacant(e) => {
                        e.insert(key.id());
                        Ok(())
                    }
                }
            }
            WireMessage::Transaction => {
                if state.in_transaction {
                    self.finish_transaction(state);
                } else {
                    *state = ReadState {
                        in_transaction: true,
                        ..ReadState::default()
                    };
                }
                Ok(())
            }
            WireMessage::Ping => Ok(()),
        }
    }

    fn receive_entry(
        &self,
        state: &mut ReadState,
        remote_id: u32,
        value: WireValue,
        old_data: bool,
    ) -> Result<(), NodeError> {
        let key = self
            .field_map
            .get(&remote_id)
            .and_then(|id| self.arena.key(*id))
            .ok_or(NodeError::UnknownKey(remote_id))?;

        if state.in_transaction {
            state.received += 1;
            state.touched.push(key.clone());
        }

        if !old_data && self.arena.role().is_server() && self.has_outstanding(key.id()) {
            tracing::debug!("[{}] Conflicting write to '{}'", self.addr, key.name());
            if state.in_transaction {
                state.deny_transaction = true;
            } else {
                self.offer(Message::Denial(1));
                self.reoffer(&key);
            }
            return Ok(());
        }

        let value = self.resolve_value(value);
        let entry = Entry::new(key.clone(), value, Some(self.id));
        if state.in_transaction {
            state.buffer.push(entry);
            return Ok(());
        }

        if let Some(table) = key.table() {
            table.process_transaction(true, vec![Message::Entry(entry)]);
        }
        self.offer(Message::Confirmation(1));
        Ok(())
    }

    fn finish_transaction(&self, state: &mut ReadState) {
        let finished = std::mem::take(state);
        let count = finished.received + 2;

        if finished.deny_transaction {
            tracing::debug!(
                "[{}] Denying transaction of {} entries",
                self.addr,
                finished.received
            );
            self.offer(Message::Denial(count));
            let mut seen = Vec::new();
            for key in finished.touched {
                if !seen.contains(&key.id()) {
                    seen.push(key.id());
                    self.reoffer(&key);
                }
            }
            return;
        }

        let mut groups: Vec<(Arc<Table>, Vec<Message>)> = Vec::new();
        for entry in finished.buffer {
            let Some(table) = entry.key().table() else {
                continue;
            };
            match groups.iter_mut().find(|(t, _)| Arc::ptr_eq(t, &table)) {
                Some((_, messages)) => messages.push(Message::Entry(entry)),
                None => groups.push((
                    table,
                    vec![Message::TransactionStart, Message::Entry(entry)],
                )),
            }
        }
        for (table, mut messages) in groups {
            messages.push(Message::TransactionEnd);
            table.process_transaction(true, messages);
        }
        self.offer(Message::Confirmation(count));
    }

    /// A write to `key_id` is queued for, or unacknowledged by, this peer.
    fn has_outstanding(&self, key_id: u32) -> bool {
        self.queue.contains_key(key_id) || self.ledger.lock().contains_key(key_id)
    }

    fn reoffer(&self, key: &Arc<Key>) {
        if let Some(current) = key.entry() {
            self.offer(Message::OldData(current));
        }
    }

    fn resolve_value(&self, value: WireValue) -> Value {
        match value {
            WireValue::Boolean(v) => Value::Boolean(v),
            WireValue::Integer(v) => Value::Integer(v),
            WireValue::Double(v) => Value::Double(v),
            WireValue::String(v) => Value::String(v),
            WireValue::Table(remote_id) => Value::Table(self.remote_table(remote_id)),
        }
    }

    /// Maps a peer's table id to a local table, creating an anonymous one
    /// and telling the peer its id on first sight.
    fn remote_table(&self, remote_id: u32) -> Arc<Table> {
        let table = match self.table_map.entry(remote_id) {
            MapEntry::Occupied(e) => return e.get().clone(),
            MapEntry::Vacant(e) => e.insert(self.arena.create_table()).clone(),
        };
        self.offer(Message::TableAssignment {
            table: table.clone(),
            alternate_id: remote_id,
        });
        self.subscribe(&table);
        table
    }

    /// Records the peer's id for `table`. Ids are never remapped.
    fn map_table(&self, remote_id: u32, table: &Arc<Table>) -> Result<(), NodeError> {
        match self.table_map.entry(remote_id) {
            MapEntry::Occupied(e) if Arc::ptr_eq(e.get(), table) => Ok(()),
            MapEntry::Occupied(_) => Err(NodeError::Reassigned {
                kind: "table",
                id: remote_id,
            }),
            MapEntry::Vacant(e) => {
                e.insert(table.clone());
                Ok(())
            }
        }
    }

    fn acknowledge(&self, count: u32, confirmed: bool) -> Result<(), NodeError> {
        let released = self.ledger.lock().pop(count)?;
        if !confirmed || self.arena.role().is_server() {
            return Ok(());
        }
        for acknowledged in released {
            match acknowledged {
                Acknowledged::Single(entry) => {
                    if let Some(table) = entry.key().table() {
                        table.confirm(&[entry]);
                    }
                }
                Acknowledged::Transaction(entries) => {
                    let mut groups: Vec<(Arc<Table>, Vec<Arc<Entry>>)> = Vec::new();
                    for entry in entries {
                        let Some(table) = entry.key().table() else {
                            continue;
                        };
                        match groups.iter_mut().find(|(t, _)| Arc::ptr_eq(t, &table)) {
                            Some((_, batch)) => batch.push(entry),
                            None => groups.push((table, vec![entry])),
                        }
                    }
                    for (table, batch) in groups {
                        table.confirm(&batch);
                    }
                }
            }
        }
        Ok(())
    }

    // ---- writer -----------------------------------------------------------

    async fn write_loop(self: Arc<Self>, mut writer: OwnedWriteHalf) -> Result<(), NodeError> {
        let mut closed = self.closed.subscribe();
        let mut buf = BytesMut::new();
        let mut idle = false;

        loop {
            let next = tokio::select! {
                _ = closed.wait_for(|c| *c) => return Ok(()),
                next = self.queue.next(self.timing.write_delay()) => next,
            };

            match next {
                Some(message) => {
                    idle = false;
                    self.stage(&message, &mut buf)?;
                    while let Some(message) = self.queue.poll() {
                        self.stage(&message, &mut buf)?;
                    }
                }
                None if idle => {
                    idle = false;
                    WireMessage::Ping.encode(&mut buf)?;
                }
                None => {
                    idle = true;
                    continue;
                }
            }

            tracing::debug!("[{}] Sending {} bytes", self.addr, buf.len());
            writer.write_all(&buf).await?;
            buf.clear();
        }
    }

    /// Records `message` on the ledger and encodes it into `buf`.
    fn stage(&self, message: &Message, buf: &mut BytesMut) -> Result<(), NodeError> {
        match message {
            Message::Entry(entry) | Message::OldData(entry) => {
                self.ledger.lock().push_entry(entry.clone())
            }
            Message::TransactionStart | Message::TransactionEnd => self.ledger.lock().push_marker(),
            _ => {}
        }
        message.encode(buf)?;
        Ok(())
    }
}

fn table_value(message: &Message) -> Option<Arc<Table>> {
    match message {
        Message::Entry(entry) => entry.value().as_table().cloned(),
        _ => None,
    }
}

impl Subscriber for Connection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `message`. An entry holding a sub-table also subscribes this
    /// connection to the sub-table, after the entry that names it.
    fn offer(&self, message: Message) {
        let table = table_value(&message);
        if let Some(table) = &table {
            self.arena.register_table(table);
        }
        self.queue.offer(message);
        if let Some(table) = table {
            self.subscribe(&table);
        }
    }

    fn offer_all(&self, messages: &[Message]) {
        let tables: Vec<Arc<Table>> = messages.iter().filter_map(table_value).collect();
        for table in &tables {
            self.arena.register_table(table);
        }
        self.queue.offer_all(messages.iter().cloned());
        for table in &tables {
            self.subscribe(table);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
