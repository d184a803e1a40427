//! Network Probe. Tracks whether the device currently has connectivity
//! and publishes debounced change notifications so the sync manager
//! doesn't thrash on flapping links.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

const DEBOUNCE: Duration = Duration::from_millis(500);

#[async_trait::async_trait]
pub trait NetworkProbe: Send + Sync {
    fn is_online(&self) -> bool;
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Default probe. Connectivity is reported by the host application via
/// `set_online`; this crate has no platform reachability API of its own.
/// Updates are coalesced so a flapping link doesn't fire a notification
/// more than once per debounce window.
pub struct DebouncedNetworkProbe {
    online: Arc<AtomicBool>,
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl DebouncedNetworkProbe {
    pub fn new(initial_online: bool) -> Self {
        let (tx, rx) = watch::channel(initial_online);
        Self {
            online: Arc::new(AtomicBool::new(initial_online)),
            tx,
            rx,
        }
    }

    /// Called by the host application (platform reachability callback).
    /// Spawns a debounce timer; only the last call within the window
    /// takes effect.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        let flag = self.online.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            let settled = flag.load(Ordering::SeqCst);
            let _ = tx.send_if_modified(|current| {
                if *current != settled {
                    *current = settled;
                    true
                } else {
                    false
                }
            });
        });
    }
}

#[async_trait::async_trait]
impl NetworkProbe for DebouncedNetworkProbe {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_initial_state() {
        let probe = DebouncedNetworkProbe::new(true);
        assert!(probe.is_online());
    }

    #[tokio::test]
    async fn set_online_updates_immediately_for_is_online() {
        let probe = DebouncedNetworkProbe::new(true);
        probe.set_online(false);
        assert!(!probe.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_sees_change_after_debounce() {
        let probe = DebouncedNetworkProbe::new(true);
        let mut rx = probe.subscribe();
        probe.set_online(false);
        tokio::time::advance(Duration::from_millis(600)).await;
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }
}
