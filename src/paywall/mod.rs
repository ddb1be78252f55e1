//! Paywall reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! register_paywall(entry)
//!     → registry (DashMap keyed by address) + per-address worker
//!     → feed subscription "address:<addr>"
//!
//! SubscriptionClient::next_event
//!     → engine.rs dispatch (AddressActivity → worker queue, others logged)
//!     → worker: TxLookup (full set, under deadline)
//!     → types.rs AggregateResult::compute (not_before filter, sum)
//!     → observer callback
//! ```
//!
//! # Design Decisions
//! - Results are rebuilt from the full transaction set on every event, so
//!   missed, duplicated or reordered events cannot skew the total
//! - A failed lookup reports nothing; the next event starts from scratch
//! - Duplicate registrations are rejected, never merged
//! - Fulfillment is sticky for the lifetime of a registration

pub mod engine;
pub mod types;

pub use engine::ReconciliationEngine;
pub use types::{AggregateResult, Observer, ObserverError, PaywallEntry, PaywallError};
