//! Deadline enforcement for outbound calls.
//!
//! # Responsibilities
//! - Wrap indexer lookups and feed handshakes with a timeout
//! - Cancel the wrapped future cleanly when the deadline passes

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The wrapped operation did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {0:?} exceeded")]
pub struct DeadlineExceeded(pub Duration);

/// Run `fut` to completion or give up after `limit`.
pub async fn with_deadline<F>(limit: Duration, fut: F) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DeadlineExceeded(limit))
}
