//! Metrics collection and exposition.
//!
//! # Metrics
//! - `paywall_feed_events_total` (counter): decoded feed events by kind
//! - `paywall_feed_decode_errors_total` (counter): frames that failed to decode
//! - `paywall_feed_reconnects_total` (counter): successful reconnects
//! - `paywall_best_block_height` (gauge): latest block height seen on the feed
//! - `paywall_active_entries` (gauge): registered paywalls
//! - `paywall_reconciliations_total` (counter): recomputes by outcome
//! - `paywall_observer_errors_total` (counter): observer callbacks that failed

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_feed_event(kind: &'static str) {
    counter!("paywall_feed_events_total", "kind" => kind).increment(1);
}

pub fn record_decode_error() {
    counter!("paywall_feed_decode_errors_total").increment(1);
}

pub fn record_reconnect() {
    counter!("paywall_feed_reconnects_total").increment(1);
}

pub fn record_best_block(height: u64) {
    gauge!("paywall_best_block_height").set(height as f64);
}

pub fn record_active_entries(count: usize) {
    gauge!("paywall_active_entries").set(count as f64);
}

/// `outcome` is one of `paid`, `unpaid`, `lookup_failed`.
pub fn record_reconciliation(outcome: &'static str) {
    counter!("paywall_reconciliations_total", "outcome" => outcome).increment(1);
}

pub fn record_observer_error() {
    counter!("paywall_observer_errors_total").increment(1);
}
