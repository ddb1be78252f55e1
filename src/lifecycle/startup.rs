//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect the feed and subscribe to heartbeat and new-block topics
//! - Build the reconciliation engine around the given lookup
//! - Install the observer, then register paywalls declared in config
//! - Spawn the dispatch loop
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The observer is in place before the first registration, so no report
//!   can be missed

use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::WatcherConfig;
use crate::lookup::TxLookup;
use crate::paywall::{AggregateResult, ObserverError, PaywallEntry, PaywallError, ReconciliationEngine};
use crate::subscription::{BestBlock, SubscriptionClient, SubscriptionError, Topic};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("feed setup failed: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("paywall registration failed: {0}")]
    Paywall(#[from] PaywallError),
}

/// A running feed client, engine and dispatch loop.
#[derive(Debug)]
pub struct Watcher {
    client: Arc<SubscriptionClient>,
    engine: ReconciliationEngine,
    dispatch: JoinHandle<()>,
}

/// Bring the watcher up.
pub async fn start<F>(
    config: &WatcherConfig,
    lookup: Arc<dyn TxLookup>,
    observer: F,
) -> Result<Watcher, StartupError>
where
    F: Fn(&AggregateResult) -> Result<(), ObserverError> + Send + Sync + 'static,
{
    let client = Arc::new(SubscriptionClient::connect(&config.subscription).await?);
    client.subscribe(Topic::Heartbeat);
    client.subscribe(Topic::NewBlock);

    let engine = ReconciliationEngine::new(lookup, client.clone(), config.paywall.clone());
    engine.set_observer(observer);

    for spec in &config.paywalls {
        if let Err(e) = engine.register_paywall(PaywallEntry::from(spec)) {
            client.shutdown().await;
            return Err(e.into());
        }
    }

    let dispatch = {
        let engine = engine.clone();
        let client = client.clone();
        tokio::spawn(async move { engine.run(&client).await })
    };

    tracing::info!(
        endpoint = %client.endpoint(),
        paywalls = engine.len(),
        "Paywall watcher started"
    );

    Ok(Watcher {
        client,
        engine,
        dispatch,
    })
}

impl Watcher {
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn client(&self) -> &SubscriptionClient {
        &self.client
    }

    pub fn best_block(&self) -> BestBlock {
        self.client.best_block()
    }

    /// Ordered shutdown: close the feed, let the dispatch loop drain, then
    /// wait for in-flight reconciliations.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
        if let Err(e) = self.dispatch.await {
            tracing::warn!(error = %e, "Dispatch loop ended abnormally");
        }
        self.engine.shutdown().await;
        tracing::info!("Paywall watcher stopped");
    }
}
