//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup and on reload):
//!     forwarders { base, name: overrides, ... }
//!     → resolver.rs (merge with base, compile expressions)
//!     → Freeze as immutable RoutingTable
//!
//! Incoming Request (parsed request value)
//!     → selector.rs (evaluate predicates in name order)
//!     → Return: matched Forwarder or None
//! ```
//!
//! # Design Decisions
//! - Forwarders compiled at startup, immutable at runtime
//! - Deterministic: same input always selects the same forwarder
//! - First match wins (ordered by name)

pub mod forwarder;
pub mod resolver;
pub mod selector;

use std::sync::Arc;

use arc_swap::ArcSwap;

pub use forwarder::{Forwarder, RoutingTable};
pub use resolver::{resolve, ResolveError};
pub use selector::select;

/// Routing table shared between connections and swapped on reload.
pub type SharedTable = Arc<ArcSwap<RoutingTable>>;

pub fn shared(table: RoutingTable) -> SharedTable {
    Arc::new(ArcSwap::from_pointee(table))
}
