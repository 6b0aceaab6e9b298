//! Stateful reverse proxy library.
//!
//! Forwarders are chosen per request by compiled expressions, may consult
//! external state APIs before the request is forwarded, and rewrite the
//! raw request and response header blocks on the way through.

// Core subsystems
pub mod config;
pub mod expression;
pub mod headers;
pub mod http;
pub mod net;
pub mod proxy;
pub mod routing;
pub mod state;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
pub use routing::{resolve, RoutingTable, SharedTable};
