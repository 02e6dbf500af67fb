//! Hold/continue/withdraw handoff.
//!
//! A creation started with `option=hold` parks between resource
//! preparation and VM creation until the user signals `continue` or
//! `withdraw`. Each held MCI gets its own watch channel; the registry
//! maps the MCI key to its sender.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// State of a held creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldSignal {
    Holding,
    Continue,
    Withdraw,
}

/// Log cadence while a creation stays held.
const HOLD_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Registry of held MCI creations.
#[derive(Clone, Default)]
pub struct HoldRegistry {
    inner: Arc<Mutex<HashMap<String, watch::Sender<HoldSignal>>>>,
}

impl HoldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park until the MCI is released. Returns the releasing signal.
    pub async fn hold(&self, key: &str) -> HoldSignal {
        let mut rx = {
            let (tx, rx) = watch::channel(HoldSignal::Holding);
            let mut map = self.inner.lock().unwrap();
            map.insert(key.to_string(), tx);
            rx
        };

        loop {
            match tokio::time::timeout(HOLD_LOG_INTERVAL, rx.changed()).await {
                Ok(Ok(())) => {
                    let signal = *rx.borrow();
                    if signal != HoldSignal::Holding {
                        self.remove(key);
                        return signal;
                    }
                }
                // Sender dropped without a signal: treat as release.
                Ok(Err(_)) => {
                    self.remove(key);
                    return HoldSignal::Continue;
                }
                Err(_) => {
                    info!(mci = %key, "holding");
                }
            }
        }
    }

    /// Release a held creation. Returns false when nothing is held
    /// under the key.
    pub fn signal(&self, key: &str, signal: HoldSignal) -> bool {
        let map = self.inner.lock().unwrap();
        match map.get(key) {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }

    /// Whether a creation is currently held under the key.
    pub fn is_held(&self, key: &str) -> bool {
        self.inner.lock().unwrap().contains_key(key)
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn continue_releases_the_hold() {
        let registry = HoldRegistry::new();
        let held = registry.clone();
        let waiter = tokio::spawn(async move { held.hold("/ns/demo/mci/m1").await });

        // Let the waiter register.
        tokio::task::yield_now().await;
        assert!(registry.is_held("/ns/demo/mci/m1"));
        assert!(registry.signal("/ns/demo/mci/m1", HoldSignal::Continue));

        assert_eq!(waiter.await.unwrap(), HoldSignal::Continue);
        assert!(!registry.is_held("/ns/demo/mci/m1"));
    }

    #[tokio::test(start_paused = true)]
    async fn withdraw_releases_the_hold() {
        let registry = HoldRegistry::new();
        let held = registry.clone();
        let waiter = tokio::spawn(async move { held.hold("/ns/demo/mci/m1").await });

        tokio::task::yield_now().await;
        registry.signal("/ns/demo/mci/m1", HoldSignal::Withdraw);
        assert_eq!(waiter.await.unwrap(), HoldSignal::Withdraw);
    }

    #[tokio::test]
    async fn signal_without_hold_reports_false() {
        let registry = HoldRegistry::new();
        assert!(!registry.signal("/ns/demo/mci/ghost", HoldSignal::Continue));
    }
}
