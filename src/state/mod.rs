//! State API subsystem.
//!
//! # Data Flow
//! ```text
//! selected Forwarder
//!     → pipeline.rs (for each StateApi, in order)
//!         → pre expressions  → outcome.rs (Continue | Use | Skip | Break | Respond)
//!         → client.rs        (HTTP call, JSON body parsed into response.data)
//!         → post expressions → outcome.rs (Continue | Break | Respond)
//!     → Proceed(scope) or Abort { status }
//! ```
//!
//! # Design Decisions
//! - scope.rs owns the positional evaluation scope shared by every
//!   expression in the proxy
//! - The HTTP transport is a trait so the pipeline can be exercised without
//!   a network

pub mod api;
pub mod client;
pub mod outcome;
pub mod pipeline;
pub mod scope;

pub use api::{RequestOptions, StateApi};
pub use client::{StateClient, StateTransport};
pub use outcome::{PostOutcome, PreOutcome};
pub use pipeline::{run, PipelineOutcome};
pub use scope::{EvaluationScope, StateApiScope, StateRecord, EVALUATION_SCOPE_NAMES};
