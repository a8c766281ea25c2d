//! Observable values with explicit subscriptions.
//!
//! Ambient UI state (container width, latest preview) is published through an
//! [`Observable`] instead of shared mutable globals. Subscribers hold a
//! [`Subscription`]; dropping it or calling [`Subscription::unsubscribe`]
//! ends the subscription.

use tokio::sync::watch;

/// A value that notifies subscribers when it changes
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Observable<T> {
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self { tx }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Store a value; subscribers are only woken if it differs.
    /// Returns true if the value changed.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Subscribe to future changes (the current value counts as seen)
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Handle for one subscriber
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Wait for the next change; `None` once the observable is gone
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Latest value without waiting
    pub fn latest(&self) -> T {
        self.rx.borrow().clone()
    }

    pub fn unsubscribe(self) {}
}

/// Interactive canvas edge length for a container width
pub fn canvas_size_for(container_width: u32, min: u32, max: u32) -> u32 {
    container_width.clamp(min, max.max(min))
}
