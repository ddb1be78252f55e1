//! Paywall value types and errors.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::config::PaywallSpec;
use crate::lookup::TransactionDetail;

/// One active payment obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaywallEntry {
    /// Address that must receive the payment. Unique among active entries.
    pub address: String,
    /// Minimum total, in atoms.
    pub required_amount: u64,
    /// Payments timestamped before this Unix time do not count.
    pub not_before: i64,
    /// Unix time the entry was created.
    pub registered_at: i64,
}

impl PaywallEntry {
    pub fn new(address: impl Into<String>, required_amount: u64, not_before: i64) -> Self {
        Self {
            address: address.into(),
            required_amount,
            not_before,
            registered_at: unix_now(),
        }
    }

    /// Whether `tx` counts toward this entry.
    pub fn accepts(&self, tx: &TransactionDetail) -> bool {
        tx.address == self.address && tx.timestamp >= self.not_before
    }
}

impl From<&PaywallSpec> for PaywallEntry {
    fn from(spec: &PaywallSpec) -> Self {
        PaywallEntry::new(spec.address.clone(), spec.amount, spec.not_before)
    }
}

/// Fulfillment state of an entry, rebuilt from the full transaction set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub entry: PaywallEntry,
    /// Qualifying transactions, in the order the lookup returned them.
    pub matching_transactions: Vec<TransactionDetail>,
    pub total_paid: u64,
    pub fulfilled: bool,
}

impl AggregateResult {
    /// Filter `txs` by the entry's address and `not_before`, then total them.
    pub fn compute(entry: PaywallEntry, txs: Vec<TransactionDetail>) -> Self {
        let matching_transactions: Vec<_> = txs.into_iter().filter(|tx| entry.accepts(tx)).collect();
        let total_paid = matching_transactions
            .iter()
            .fold(0u64, |sum, tx| sum.saturating_add(tx.amount));
        let fulfilled = total_paid >= entry.required_amount;

        Self {
            entry,
            matching_transactions,
            total_paid,
            fulfilled,
        }
    }
}

/// Error returned by an observer; logged by the engine, never propagated.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with every recomputed result.
pub type Observer = dyn Fn(&AggregateResult) -> Result<(), ObserverError> + Send + Sync;

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaywallError {
    /// An entry for this address is already active.
    #[error("paywall already registered for address {0}")]
    AlreadyRegistered(String),

    /// No active entry for this address.
    #[error("no paywall registered for address {0}")]
    NotRegistered(String),

    #[error("invalid paywall entry: {0}")]
    InvalidEntry(String),
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
