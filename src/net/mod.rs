//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (lifecycle tracking, drain on shutdown)
//!     → Hand off to HTTP layer
//!
//! Outgoing backend connection
//!     → upstream.rs (TCP connect, optional TLS with relaxed verification)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Plain and TLS streams are erased behind one boxed stream type

pub mod connection;
pub mod listener;
pub mod tls;
pub mod upstream;

use tokio::io::{AsyncRead, AsyncWrite};

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use upstream::{Connector, UpstreamError};

/// A bidirectional byte stream, plain or TLS.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

pub type BoxedStream = Box<dyn ByteStream>;
