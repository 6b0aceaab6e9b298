//! Proxy subsystem.
//!
//! # Data Flow
//! ```text
//! BufferedRequest
//!     → dispatch.rs (request ID, forwarder selection)
//!     → state::pipeline (may answer with a status)
//!     → stream.rs (backend connection, header rewrite, byte relay)
//!     → Disposition (logged and counted)
//! ```
//!
//! # Design Decisions
//! - The proxy answers with a status only before any backend byte has
//!   reached the client; later failures just close the connection
//! - Each request owns its backend connection, nothing is pooled

pub mod dispatch;
pub mod stream;

pub use dispatch::{Disposition, Dispatcher};
pub use stream::{forward, ForwardContext, ForwardStats, ProxyError};
