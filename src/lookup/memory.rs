//! In-memory transaction lookup.
//!
//! Holds an appendable set of transactions per address. Used by tests and
//! demos in place of a real indexer; can be switched into a failing mode to
//! exercise lookup-error handling.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::lookup::types::{LookupError, TransactionDetail};
use crate::lookup::TxLookup;

#[derive(Debug, Default)]
pub struct MemoryTxLookup {
    txs: DashMap<String, Vec<TransactionDetail>>,
    unavailable: AtomicBool,
    latency_ms: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryTxLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction to its address's set.
    pub fn insert(&self, tx: TransactionDetail) {
        self.txs.entry(tx.address.clone()).or_default().push(tx);
    }

    /// Drop a transaction, as a chain reorganization would.
    pub fn remove(&self, address: &str, tx_id: &str) -> Option<TransactionDetail> {
        let mut txs = self.txs.get_mut(address)?;
        let pos = txs.iter().position(|tx| tx.tx_id == tx_id)?;
        Some(txs.remove(pos))
    }

    /// While set, every lookup fails with `LookupError::Backend`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every lookup by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    /// Number of lookups served so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxLookup for MemoryTxLookup {
    async fn get_transactions(&self, address: &str) -> Result<Vec<TransactionDetail>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency as u64)).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LookupError::Backend("in-memory lookup marked unavailable".to_string()));
        }

        Ok(self
            .txs
            .get(address)
            .map(|txs| txs.value().clone())
            .unwrap_or_default())
    }
}
