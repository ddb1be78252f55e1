//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the watcher.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the paywall watcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WatcherConfig {
    /// Notification feed connection settings.
    pub subscription: SubscriptionConfig,

    /// Transaction indexer settings.
    pub lookup: LookupConfig,

    /// Reconciliation engine settings.
    pub paywall: PaywallConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Paywalls registered at startup.
    pub paywalls: Vec<PaywallSpec>,
}

/// Notification feed connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// WebSocket endpoint of the notification source (ws:// or wss://).
    pub endpoint: String,

    /// Attempts made by the initial handshake before giving up.
    pub connect_retries: u32,

    /// Timeout for a single handshake attempt in seconds.
    pub connect_timeout_secs: u64,

    /// Base delay for exponential reconnect backoff in milliseconds.
    pub backoff_base_ms: u64,

    /// Maximum delay for exponential reconnect backoff in milliseconds.
    pub backoff_max_ms: u64,

    /// Decoded events buffered ahead of the consumer.
    pub event_buffer: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://dcrdata.decred.org/ps".to_string(),
            connect_retries: 5,
            connect_timeout_secs: 10,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            event_buffer: 1024,
        }
    }
}

/// Transaction indexer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Base URL of the indexer REST API.
    pub base_url: String,

    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dcrdata.decred.org/api".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Reconciliation engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaywallConfig {
    /// Deadline for one indexer lookup made during reconciliation, in seconds.
    pub lookup_timeout_secs: u64,

    /// Upper bound on lookups in flight across all addresses.
    pub max_concurrent_lookups: usize,

    /// Drop an entry (and its address watch) after its first fulfilled report.
    pub remove_on_fulfillment: bool,

    /// Queue one reconciliation as soon as an entry is registered.
    pub reconcile_on_register: bool,
}

impl Default for PaywallConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_secs: 30,
            max_concurrent_lookups: 16,
            remove_on_fulfillment: false,
            reconcile_on_register: false,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// A paywall declared in the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PaywallSpec {
    /// Address that must receive the payment.
    pub address: String,

    /// Minimum amount, in atoms.
    pub amount: u64,

    /// Unix timestamp before which payments do not count.
    #[serde(default)]
    pub not_before: i64,
}
