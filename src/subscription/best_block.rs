//! Best-known chain height.

use std::sync::Arc;
use tokio::sync::watch;

use crate::observability::metrics;

/// Shared handle to the most recently observed block height.
///
/// The feed connection is the only writer; any number of clones may read it
/// or wait for it to change.
#[derive(Debug, Clone)]
pub struct BestBlock {
    tx: Arc<watch::Sender<u64>>,
}

impl BestBlock {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Latest height, `0` until the first new-block notification.
    pub fn height(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Receiver notified on every update.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Wait until the height reaches at least `height`.
    pub async fn wait_for(&self, height: u64) -> u64 {
        let mut rx = self.watch();
        let reached = match rx.wait_for(|h| *h >= height).await {
            Ok(h) => *h,
            // The sender lives as long as `self`, so this is unreachable.
            Err(_) => self.height(),
        };
        reached
    }

    pub(crate) fn set(&self, height: u64) {
        self.tx.send_replace(height);
        metrics::record_best_block(height);
    }
}

impl Default for BestBlock {
    fn default() -> Self {
        Self::new()
    }
}
