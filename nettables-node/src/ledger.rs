//! Writes sent to a peer and not yet acknowledged.
//!
//! The writer appends one item per Entry or OldData it sends and a `None` per
//! transaction marker, so a transaction occupies `entries + 2` slots. The
//! peer acknowledges with Confirmation or Denial counts that pop items in
//! order; a `None` pair rebuilds the transaction boundaries.

use crate::error::NodeError;
use nettables_core::Entry;
use std::collections::VecDeque;
use std::sync::Arc;

/// Writes released by one acknowledgement.
#[derive(Debug)]
pub enum Acknowledged {
    Single(Arc<Entry>),
    Transaction(Vec<Arc<Entry>>),
}

#[derive(Debug, Default)]
pub struct Ledger {
    items: VecDeque<Option<Arc<Entry>>>,
    /// Entries of a transaction whose closing marker has not been popped.
    open: Option<Vec<Arc<Entry>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_entry(&mut self, entry: Arc<Entry>) {
        self.items.push_back(Some(entry));
    }

    pub fn push_marker(&mut self) {
        self.items.push_back(None);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if an unacknowledged write for `key_id` is outstanding.
    pub fn contains_key(&self, key_id: u32) -> bool {
        self.items
            .iter()
            .flatten()
            .any(|entry| entry.key().id() == key_id)
            || self
                .open
                .iter()
                .flatten()
                .any(|entry| entry.key().id() == key_id)
    }

    /// Pops `count` items. Fails without popping anything if fewer are
    /// outstanding.
    pub fn pop(&mut self, count: u32) -> Result<Vec<Acknowledged>, NodeError> {
        if count as usize > self.items.len() {
            return Err(NodeError::ExcessAcknowledgement {
                count,
                outstanding: self.items.len(),
            });
        }

        let mut released = Vec::new();
        for item in self.items.drain(..count as usize) {
            match item {
                None => match self.open.take() {
                    None => self.open = Some(Vec::new()),
                    Some(entries) => released.push(Acknowledged::Transaction(entries)),
                },
                Some(entry) => match self.open.as_mut() {
                    Some(entries) => entries.push(entry),
                    None => released.push(Acknowledged::Single(entry)),
                },
            }
        }
        Ok(released)
    }
}
