//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept loop, TLS termination, connection span)
//!     → request.rs (buffer head and body, enforce limits, parse)
//!     → proxy::dispatch (select forwarder, state APIs, relay)
//!     → response.rs (status-only answers from the proxy itself)
//! ```
//!
//! # Design Decisions
//! - HTTP/1.x only; the header block is forwarded as text so header
//!   rules can operate on it directly
//! - Only the first request of a connection is inspected

pub mod request;
pub mod response;
pub mod server;

pub use request::{read_request, BufferedRequest, RequestError, RequestLimits};
pub use response::write_status;
pub use server::{AppState, ProxyServer, ServerError};
