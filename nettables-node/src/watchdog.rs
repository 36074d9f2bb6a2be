//! Liveness timer for one connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Expires when an activated connection goes `expiration` without a feed.
///
/// The timer is dormant until [`activate`](Self::activate) so a peer that
/// has not finished its handshake is not timed out.
#[derive(Debug, Default)]
pub struct Watchdog {
    active: AtomicBool,
    activated: Notify,
    fed: Notify,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            self.activated.notify_one();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn feed(&self) {
        self.fed.notify_one();
    }

    /// Resolves once the watchdog has expired.
    pub async fn expired(&self, expiration: Duration) {
        if !self.is_active() {
            self.activated.notified().await;
        }
        while tokio::time::timeout(expiration, self.fed.notified())
            .await
            .is_ok()
        {}
    }
}
