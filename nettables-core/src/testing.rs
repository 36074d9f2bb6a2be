//! Test doubles shared by the unit tests.

use crate::message::Message;
use crate::queue::UpdateQueue;
use crate::table::Subscriber;
use crate::value::ConnectionId;
use std::sync::Arc;

/// A subscriber that only records what it is offered.
pub(crate) struct TestSubscriber {
    id: ConnectionId,
    queue: UpdateQueue,
}

impl TestSubscriber {
    pub fn new(id: ConnectionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            queue: UpdateQueue::new(),
        })
    }

    pub fn drain(&self) -> Vec<Message> {
        std::iter::from_fn(|| self.queue.poll()).collect()
    }
}

impl Subscriber for TestSubscriber {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn offer(&self, message: Message) {
        self.queue.offer(message);
    }

    fn offer_all(&self, messages: &[Message]) {
        self.queue.offer_all(messages.iter().cloned());
    }
}
