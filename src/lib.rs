//! Paywall watcher library.
//!
//! Watches a blockchain notification feed and reports when registered
//! payment obligations are met.

pub mod config;
pub mod lifecycle;
pub mod lookup;
pub mod observability;
pub mod paywall;
pub mod resilience;
pub mod subscription;

pub use config::WatcherConfig;
pub use lifecycle::{Shutdown, Watcher};
pub use lookup::{TransactionDetail, TxLookup};
pub use paywall::{AggregateResult, PaywallEntry, PaywallError, ReconciliationEngine};
pub use subscription::{InboundEvent, SubscriptionClient, Topic};
