//! Outbound mailbox for one peer.
//!
//! Outside a transaction an entry for a key that is already waiting replaces
//! the waiting message in place, so a slow link only ever carries the latest
//! value of each key. Transaction contents are kept verbatim. A transaction
//! marker or an OldData for a key ends coalescing for the messages before it,
//! which keeps a newer value from jumping ahead of them.

use crate::message::Message;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Message>,
    /// Sequence number of `messages[0]`.
    head: u64,
    /// Key id -> sequence number of a replaceable pending entry.
    coalesce: HashMap<u32, u64>,
    /// Key id -> number of pending Entry/OldData messages.
    pending: HashMap<u32, usize>,
    in_transaction: bool,
}

impl QueueState {
    fn append(&mut self, message: Message) -> u64 {
        if let Some(entry) = message.entry() {
            *self.pending.entry(entry.key().id()).or_default() += 1;
        }
        let seq = self.head + self.messages.len() as u64;
        self.messages.push_back(message);
        seq
    }

    fn offer(&mut self, message: Message) {
        if message.is_transaction_marker() {
            self.in_transaction = !self.in_transaction;
            self.coalesce.clear();
            self.append(message);
            return;
        }
        if self.in_transaction {
            self.append(message);
            return;
        }
        match &message {
            Message::Entry(entry) => {
                let key_id = entry.key().id();
                if let Some(&seq) = self.coalesce.get(&key_id) {
                    let position = (seq - self.head) as usize;
                    self.messages[position] = message;
                    return;
                }
                let seq = self.append(message);
                self.coalesce.insert(key_id, seq);
            }
            Message::OldData(entry) => {
                self.coalesce.remove(&entry.key().id());
                self.append(message);
            }
            // TODO: merge adjacent Confirmation/Denial counts once the peer
            // ledger can take a combined acknowledgement across a transaction.
            _ => {
                self.append(message);
            }
        }
    }

    fn poll(&mut self) -> Option<Message> {
        let message = self.messages.pop_front()?;
        let seq = self.head;
        self.head += 1;
        if let Some(entry) = message.entry() {
            let key_id = entry.key().id();
            if let Some(count) = self.pending.get_mut(&key_id) {
                *count -= 1;
                if *count == 0 {
                    self.pending.remove(&key_id);
                }
            }
            if self.coalesce.get(&key_id) == Some(&seq) {
                self.coalesce.remove(&key_id);
            }
        }
        Some(message)
    }
}

/// FIFO of messages waiting to be written to one peer.
///
/// Safe for concurrent producers and one consumer; `offer` wakes a consumer
/// parked in [`next`](Self::next).
#[derive(Default)]
pub struct UpdateQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, message: Message) {
        self.state.lock().offer(message);
        self.available.notify_one();
    }

    /// Offers several messages with no other producer interleaving.
    pub fn offer_all<I>(&self, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        {
            let mut state = self.state.lock();
            for message in messages {
                state.offer(message);
            }
        }
        self.available.notify_one();
    }

    pub fn poll(&self) -> Option<Message> {
        self.state.lock().poll()
    }

    pub fn peek(&self) -> Option<Message> {
        self.state.lock().messages.front().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Returns true if an Entry or OldData for `key_id` is waiting.
    pub fn contains_key(&self, key_id: u32) -> bool {
        self.state.lock().pending.contains_key(&key_id)
    }

    /// Waits up to `delay` for a message.
    pub async fn next(&self, delay: Duration) -> Option<Message> {
        loop {
            if let Some(message) = self.poll() {
                return Some(message);
            }
            if tokio::time::timeout(delay, self.available.notified())
                .await
                .is_err()
            {
                return self.poll();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, Role};
    use crate::message::MessageKind;
    use crate::value::{Entry, Value};
    use std::sync::Arc;

    struct Fixture {
        _arena: Arc<Arena>,
        table: Arc<crate::Table>,
    }

    impl Fixture {
        fn new() -> Self {
            let arena = Arena::new(Role::Server);
            let table = arena.table("T");
            Self {
                _arena: arena,
                table,
            }
        }

        fn entry(&self, name: &str, value: i32) -> Message {
            let key = self.table.get_or_create_key(name).unwrap();
            Message::Entry(Entry::new(key, Value::Integer(value), None))
        }

        fn old_data(&self, name: &str, value: i32) -> Message {
            let key = self.table.get_or_create_key(name).unwrap();
            Message::OldData(Entry::new(key, Value::Integer(value), None))
        }
    }

    fn int_of(message: &Message) -> i32 {
        message.entry().unwrap().value().as_int().unwrap()
    }

    #[test]
    fn test_coalescing_keeps_first_position_and_last_value() {
        let f = Fixture::new();
        let queue = UpdateQueue::new();
        queue.offer(f.entry("a", 1));
        queue.offer(f.entry("b", 1));
        for v in 2..=10 {
            queue.offer(f.entry("a", v));
        }

        assert_eq!(queue.len(), 2);
        let first = queue.poll().unwrap();
        assert_eq!(first.entry().unwrap().key().name(), "a");
        assert_eq!(int_of(&first), 10);
        assert_eq!(queue.poll().unwrap().entry().unwrap().key().name(), "b");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_no_coalescing_after_poll() {
        let f = Fixture::new();
        let queue = UpdateQueue::new();
        queue.offer(f.entry("a", 1));
        assert_eq!(int_of(&queue.poll().unwrap()), 1);

        queue.offer(f.entry("a", 2));
        queue.offer(f.entry("b", 2));
        queue.offer(f.entry("a", 3));
        assert_eq!(queue.len(), 2);
        assert_eq!(int_of(&queue.poll().unwrap()), 3);
    }

    #[test]
    fn test_transaction_contents_are_verbatim() {
        let f = Fixture::new();
        let queue = UpdateQueue::new();
        queue.offer(Message::TransactionStart);
        queue.offer(f.entry("a", 1));
        queue.offer(f.entry("a", 2));
        queue.offer(Message::TransactionEnd);

        let kinds: Vec<_> = std::iter::from_fn(|| queue.poll())
            .map(|m| m.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::TransactionStart,
                MessageKind::Entry,
                MessageKind::Entry,
                MessageKind::TransactionEnd
            ]
        );
    }

    #[test]
    fn test_value_does_not_jump_ahead_of_transaction() {
        let f = Fixture::new();
        let queue = UpdateQueue::new();
        queue.offer(f.entry("a", 1));
        queue.offer(Message::TransactionStart);
        queue.offer(f.entry("a", 2));
        queue.offer(Message::TransactionEnd);
        queue.offer(f.entry("a", 3));

        let values: Vec<_> = std::iter::from_fn(|| queue.poll())
            .filter_map(|m| m.entry().map(|e| e.value().as_int().unwrap()))
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_old_data_is_a_coalescing_barrier() {
        let f = Fixture::new();
        let queue = UpdateQueue::new();
        queue.offer(f.entry("a", 1));
        queue.offer(f.old_data("a", 2));
        queue.offer(f.entry("a", 3));

        assert_eq!(queue.len(), 3);
        assert_eq!(int_of(&queue.poll().unwrap()), 1);
        assert_eq!(queue.poll().unwrap().kind(), MessageKind::OldData);
        assert_eq!(int_of(&queue.poll().unwrap()), 3);
    }

    #[test]
    fn test_control_messages_are_not_merged() {
        let queue = UpdateQueue::new();
        queue.offer(Message::Confirmation(1));
        queue.offer(Message::Confirmation(1));
        queue.offer(Message::Denial(2));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek().unwrap().kind(), MessageKind::Confirmation);
    }

    #[test]
    fn test_contains_key_tracks_pending_entries() {
        let f = Fixture::new();
        let queue = UpdateQueue::new();
        let a = f.table.get_or_create_key("a").unwrap().id();
        assert!(!queue.contains_key(a));

        queue.offer(f.entry("a", 1));
        queue.offer(f.old_data("a", 1));
        assert!(queue.contains_key(a));
        queue.poll();
        assert!(queue.contains_key(a));
        queue.poll();
        assert!(!queue.contains_key(a));
    }

    #[test]
    fn test_offer_all_is_contiguous() {
        let f = Fixture::new();
        let queue = UpdateQueue::new();
        queue.offer_all(vec![
            Message::TransactionStart,
            f.entry("a", 1),
            Message::TransactionEnd,
        ]);
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_times_out_when_idle() {
        let queue = UpdateQueue::new();
        let started = tokio::time::Instant::now();
        assert!(queue.next(Duration::from_millis(50)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_next_wakes_on_offer() {
        let queue = Arc::new(UpdateQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        queue.offer(Message::Denial(1));

        let message = consumer.await.unwrap().unwrap();
        assert_eq!(message.kind(), MessageKind::Denial);
    }
}
