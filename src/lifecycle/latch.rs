//! Set-once broadcast signal.

use tokio::sync::watch;

/// A flag that flips once from unset to set and wakes every waiter.
///
/// Waiters that subscribe after the flag was set return immediately, which a
/// `broadcast` channel would not give us.
#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Set the latch. Returns `false` if it was already set.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|set| !std::mem::replace(set, true))
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch is set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wakes_waiters_once() {
        let latch = Arc::new(Latch::new());
        let waiter = {
            let latch = Arc::clone(&latch);
            tokio::spawn(async move { latch.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        assert!(latch.set());
        assert!(!latch.set());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn late_waiters_return_immediately() {
        let latch = Latch::new();
        latch.set();
        assert!(latch.is_set());
        tokio::time::timeout(Duration::from_millis(100), latch.wait())
            .await
            .unwrap();
    }
}
