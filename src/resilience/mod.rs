//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Feed connection lost:
//!     → backoff.rs (jittered exponential delay between reconnect attempts)
//!
//! Indexer lookup:
//!     → timeouts.rs (every lookup runs under a deadline)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Jittered backoff keeps many watchers from reconnecting in lockstep
//! - Reconnects never give up once the first handshake succeeded

pub mod backoff;
pub mod timeouts;

pub use backoff::BackoffPolicy;
pub use timeouts::{with_deadline, DeadlineExceeded};
