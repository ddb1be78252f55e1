//! Transaction lookup subsystem.
//!
//! # Data Flow
//! ```text
//! ReconciliationEngine
//!     → TxLookup::get_transactions(address)
//!         → memory.rs (in-process, appendable set)
//!         → http.rs (indexer REST API)
//!     ← full transaction set for the address
//! ```
//!
//! # Design Decisions
//! - Lookups always return the complete set known for an address, never a delta
//! - The engine owns deadlines; implementations only report backend failures

pub mod http;
pub mod memory;
pub mod types;

use async_trait::async_trait;

pub use http::HttpTxLookup;
pub use memory::MemoryTxLookup;
pub use types::{LookupError, TransactionDetail};

/// Source of authoritative transaction detail for an address.
#[async_trait]
pub trait TxLookup: Send + Sync {
    /// Every transaction currently known to pay `address`.
    async fn get_transactions(&self, address: &str) -> Result<Vec<TransactionDetail>, LookupError>;
}
