//! Notification feed subsystem.
//!
//! # Data Flow
//! ```text
//! Notification source (WebSocket)
//!     → client.rs (connection task: handshake, reconnect, topic replay)
//!     → codec.rs (JSON frame → InboundEvent, unknown frames dropped)
//!     → best_block.rs (height updated on every new-block event)
//!     → bounded event queue
//!     → SubscriptionClient::next_event (consumer)
//! ```
//!
//! # Design Decisions
//! - One socket, owned by one background task; callers talk to it by channel
//! - The remembered topic set, not the command queue, decides what is
//!   re-sent after a reconnect
//! - Malformed frames are logged and skipped, never fatal
//! - Only an explicit shutdown ends the event stream

pub mod best_block;
pub mod client;
pub mod codec;
pub mod types;

pub use best_block::BestBlock;
pub use client::SubscriptionClient;
pub use codec::DecodeError;
pub use types::{ConnectionState, InboundEvent, SubscriptionError, Topic, TopicParseError};

/// Topic registration seam used by the reconciliation engine.
pub trait Subscriptions: Send + Sync {
    fn subscribe(&self, topic: Topic);
    fn unsubscribe(&self, topic: &Topic);
}
