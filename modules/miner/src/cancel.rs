//! Cooperative cancellation
//! Tasks observe their token at delay boundaries only; replacing a serial
//! cancelable always cancels the prior holder before the new token is
//! handed out, so two generations of the same task never run together

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Sending half of a cancellation pair
pub struct CancelSource {
    sender: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> (CancelSource, CancelToken) {
        let (sender, receiver) = watch::channel(false);
        (CancelSource { sender }, CancelToken { receiver })
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

/// Receiving half, cloned into every task of one scheduling generation
#[derive(Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        // A dropped source counts as cancelled
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Wait until cancelled
    pub async fn cancelled(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// Suspend for `duration` unless cancelled first
    /// Returns true if the full delay elapsed
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

/// Holds the cancel source of at most one running task or task group
pub struct SerialCancelable {
    current: Mutex<Option<CancelSource>>,
}

impl SerialCancelable {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Cancel whatever ran before, then hand out a fresh token
    pub fn replace(&self) -> CancelToken {
        let (source, token) = CancelSource::new();
        let mut current = self.current.lock().expect("poisoned cancelable");
        if let Some(prior) = current.replace(source) {
            prior.cancel();
        }
        token
    }

    /// Cancel without starting anything new
    pub fn cancel(&self) {
        if let Some(prior) = self.current.lock().expect("poisoned cancelable").take() {
            prior.cancel();
        }
    }
}

impl Default for SerialCancelable {
    fn default() -> Self {
        Self::new()
    }
}
