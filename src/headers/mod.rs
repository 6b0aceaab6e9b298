//! Header Transformation Engine
//!
//! Rewrites the raw header block of a request or response as text.
//!
//! # Data Flow
//! ```text
//! request head ──► rewrite.rs (HTTP/1.0 upgrade on TLS, Host rewrite)
//!              ──► transform.rs (send rules, in order) ──► backend
//!
//! response head ──► transform.rs (retrieve rules, in order) ──► client
//! ```
//!
//! # Design Decisions
//! - The header block is treated as text; no header model is built.
//! - A rule without a source inserts its target before the blank line.
//! - A rule that fails is logged and skipped, the remaining rules still run.

pub mod rewrite;
pub mod rule;
pub mod transform;

pub use rewrite::{authority, header_end, host_value, rewrite_host, upgrade_http_version};
pub use rule::{HeaderRule, HeaderSource, HeaderTarget, HeaderTransformations};
pub use transform::transform;
