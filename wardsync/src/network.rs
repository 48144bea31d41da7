//! Connectivity observation
//!
//! Purely observational: the monitor never touches the queue. The host
//! application feeds runtime online/offline transitions into `set_online`;
//! the session subscribes and triggers a sync pass on the offline-to-online
//! edge. No debouncing is applied here; flapping just produces sync attempts
//! that collapse under the engine's single-flight guard.

use tokio::sync::watch;

#[derive(Clone)]
pub struct NetworkMonitor {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    /// Create a monitor seeded with the runtime's current connectivity state
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a connectivity transition. No-op if the state is unchanged.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });

        if changed {
            tracing::info!(online = online, "Network state changed");
        }
    }

    /// Subscribe to connectivity transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
