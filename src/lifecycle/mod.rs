//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Connect feed → Build engine → Register paywalls → Dispatch
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Close feed → Drain dispatch → Finish reconciliations
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then feed, then engine, then dispatch
//! - Ordered shutdown: stop events, drain, wait for lookups under deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, StartupError, Watcher};
