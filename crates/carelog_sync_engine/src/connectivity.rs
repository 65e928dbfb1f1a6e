//! Connectivity monitor.

use std::sync::Arc;
use tokio::sync::watch;

/// Reports the device's online/offline state and notifies on transitions.
///
/// The host platform feeds reachability changes in through
/// [`Connectivity::set_online`]; the engine observes them through
/// [`Connectivity::subscribe`]. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true if the device is currently online.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Records the current state. Setting an unchanged state does not notify.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolves once the device is offline.
    pub async fn wait_offline(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|online| !*online).await;
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(false)
    }
}
