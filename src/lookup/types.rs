//! Lookup value types and errors.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// One payment into an address, as reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionDetail {
    /// Address the payment went to.
    pub address: String,
    /// Transaction hash.
    pub tx_id: String,
    /// Amount paid to `address`, in atoms.
    pub amount: u64,
    /// Unix timestamp (seconds) of the transaction.
    pub timestamp: i64,
}

impl TransactionDetail {
    pub fn new(
        address: impl Into<String>,
        tx_id: impl Into<String>,
        amount: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            address: address.into(),
            tx_id: tx_id.into(),
            amount,
            timestamp,
        }
    }
}

/// Errors that can occur while fetching transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// Backend unreachable or answered with an error.
    #[error("lookup backend error: {0}")]
    Backend(String),

    /// No answer within the deadline.
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),

    /// Backend answered with something we could not decode.
    #[error("malformed lookup response: {0}")]
    Decode(String),
}
