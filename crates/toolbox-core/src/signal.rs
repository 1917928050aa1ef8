//! One-shot broadcast latch.
//!
//! A `Latch` is fired at most once. Every waiter, whether it subscribed
//! before or after the fire, observes the fired value. Built on
//! `tokio::sync::watch`, so a late subscriber never misses the
//! notification.

use tokio::sync::watch;

pub struct Latch<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone + Send + Sync> Latch<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Fire the latch. Returns `false` if it was already fired; the first
    /// value wins.
    pub fn fire(&self, value: T) -> bool {
        let mut fired = false;
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            fired = true;
            true
        });
        fired
    }

    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Subscribe. Cheap; take one while holding the state lock so the
    /// subsequent `.await` can happen after the lock is released.
    pub fn waiter(&self) -> LatchWaiter<T> {
        LatchWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T: Clone + Send + Sync> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LatchWaiter<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone + Send + Sync> LatchWaiter<T> {
    /// Wait for the fired value.
    ///
    /// Returns `None` only when the latch was dropped without ever firing.
    pub async fn wait(mut self) -> Option<T> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        }
    }
}
