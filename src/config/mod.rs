//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → WatcherConfig (validated, immutable)
//!     → sections handed to the feed client, indexer and engine
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    LookupConfig, ObservabilityConfig, PaywallConfig, PaywallSpec, SubscriptionConfig,
    WatcherConfig,
};
pub use validation::ValidationError;
