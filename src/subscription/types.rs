//! Feed-level types and error definitions.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A named subscription channel on the notification feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Periodic liveness pings (`"ping"`).
    Heartbeat,
    /// Newly connected blocks (`"newblock"`).
    NewBlock,
    /// Transactions touching one address (`"address:<addr>"`).
    Address(String),
}

impl Topic {
    pub fn address(address: impl Into<String>) -> Self {
        Topic::Address(address.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Heartbeat => f.write_str("ping"),
            Topic::NewBlock => f.write_str("newblock"),
            Topic::Address(address) => write!(f, "address:{}", address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown topic '{0}'")]
pub struct TopicParseError(pub String);

impl FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(Topic::Heartbeat),
            "newblock" => Ok(Topic::NewBlock),
            _ => match s.strip_prefix("address:") {
                Some(address) if !address.is_empty() => Ok(Topic::address(address)),
                _ => Err(TopicParseError(s.to_string())),
            },
        }
    }
}

/// A decoded notification from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Heartbeat,
    NewBlock { height: u64, hash: String },
    AddressActivity { address: String, tx_id: String },
}

impl InboundEvent {
    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Heartbeat => "heartbeat",
            InboundEvent::NewBlock { .. } => "new_block",
            InboundEvent::AddressActivity { .. } => "address_activity",
        }
    }
}

/// Lifecycle of the feed connection.
///
/// ```text
/// Disconnected → Connecting → Active → Disconnected → ... → Closed
/// ```
/// `Closed` is terminal and only reached through an explicit shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Active,
    Closed,
}

/// Errors surfaced by the subscription client.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The configured endpoint is not a usable WebSocket URL.
    #[error("invalid feed endpoint '{endpoint}': {reason}")]
    Endpoint { endpoint: String, reason: String },

    /// The initial handshake never completed.
    #[error("could not connect to {endpoint} after {attempts} attempts: {reason}")]
    Connection {
        endpoint: String,
        attempts: u32,
        reason: String,
    },
}
