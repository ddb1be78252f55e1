//! Indexer REST client.
//!
//! # Responsibilities
//! - Fetch raw transactions for an address from a dcrdata-style API
//!   (`GET {base}/address/{addr}/raw`)
//! - Reduce each transaction to the amount it pays into the address
//! - Map HTTP and decode failures onto `LookupError`

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::LookupConfig;
use crate::lookup::types::{LookupError, TransactionDetail};
use crate::lookup::TxLookup;

const ATOMS_PER_COIN: f64 = 1e8;

#[derive(Debug, Deserialize)]
struct RawTx {
    txid: String,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    vout: Vec<RawVout>,
}

#[derive(Debug, Deserialize)]
struct RawVout {
    value: f64,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: ScriptPubKey,
}

#[derive(Debug, Default, Deserialize)]
struct ScriptPubKey {
    #[serde(default)]
    addresses: Vec<String>,
}

/// `TxLookup` backed by an indexer's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTxLookup {
    client: reqwest::Client,
    base_url: url::Url,
    timeout: Duration,
}

impl HttpTxLookup {
    pub fn new(config: &LookupConfig) -> Result<Self, LookupError> {
        let base_url = url::Url::parse(&config.base_url).map_err(|e| {
            LookupError::Backend(format!("Invalid indexer URL '{}': {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(LookupError::Backend(format!(
                "Indexer URL '{}' cannot carry a path",
                config.base_url
            )));
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Backend(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn address_url(&self, address: &str) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["address", address, "raw"]);
        }
        url
    }

    fn map_error(&self, e: reqwest::Error) -> LookupError {
        if e.is_timeout() {
            LookupError::Timeout(self.timeout)
        } else if e.is_decode() {
            LookupError::Decode(e.to_string())
        } else {
            LookupError::Backend(e.to_string())
        }
    }
}

#[async_trait]
impl TxLookup for HttpTxLookup {
    async fn get_transactions(&self, address: &str) -> Result<Vec<TransactionDetail>, LookupError> {
        let url = self.address_url(address);
        tracing::debug!(%address, %url, "Fetching address transactions");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Backend(format!("indexer answered {}", status)));
        }

        let raw: Vec<RawTx> = response.json().await.map_err(|e| self.map_error(e))?;
        Ok(raw
            .into_iter()
            .filter_map(|tx| payment_to(address, tx))
            .collect())
    }
}

/// Amount `tx` pays into `address`, or `None` when no output does.
fn payment_to(address: &str, tx: RawTx) -> Option<TransactionDetail> {
    let mut paid = false;
    let mut amount: u64 = 0;

    for out in &tx.vout {
        if !out.script_pub_key.addresses.iter().any(|a| a == address) {
            continue;
        }
        paid = true;
        amount = amount.saturating_add(to_atoms(out.value));
    }

    paid.then(|| TransactionDetail {
        address: address.to_string(),
        tx_id: tx.txid,
        amount,
        timestamp: tx.time,
    })
}

fn to_atoms(coins: f64) -> u64 {
    if !coins.is_finite() || coins <= 0.0 {
        return 0;
    }
    (coins * ATOMS_PER_COIN).round() as u64
}
