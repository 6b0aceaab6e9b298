//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, or JSON for *.json)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, every problem reported)
//!     → ProxyConfig (validated, immutable)
//!     → routing::resolve (merge.rs applies `base` to each forwarder)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → routing::resolve builds a new RoutingTable
//!     → atomic swap of the shared table
//!     → new connections observe the new forwarders
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A failed reload keeps the current routing table

pub mod loader;
pub mod merge;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use merge::{merged, Merge};
pub use schema::{
    AdminConfig, ForwarderConfig, HeaderRuleConfig, HeaderTransformationsConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, OneOrMany, Predicate, ProxyConfig, SourceConfig, StateApiConfig,
    TargetConfig, TimeoutConfig, TlsConfig, BASE,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
