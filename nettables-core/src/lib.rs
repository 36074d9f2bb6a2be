//! # nettables-core
//!
//! In-memory model of the synchronized tables.
//!
//! This crate provides:
//! - Keys, typed entries and the protocol message alphabet
//! - Per-peer update queues with latest-value coalescing
//! - Tables with nested transactions and listener registries
//! - The arena that allocates and resolves key and table ids

pub mod arena;
pub mod error;
pub mod key;
pub mod listener;
pub mod message;
pub mod queue;
pub mod table;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use arena::{Arena, Role};
pub use error::CoreError;
pub use key::Key;
pub use listener::{ConnectionListener, ListenerId, ValueEvent, ValueListener};
pub use message::{Message, MessageKind};
pub use queue::UpdateQueue;
pub use table::{Subscriber, Table};
pub use value::{ConnectionId, Entry, Value};
