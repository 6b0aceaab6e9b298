//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Pick the output format from configuration
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` wins over the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Filter used when neither `RUST_LOG` nor an override is set.
fn default_filter(level: &str) -> String {
    format!("stateful_proxy={level},tower_http={level},warn")
}

/// Install the global subscriber. `level` overrides the configured level.
///
/// Returns an error if a subscriber is already installed.
pub fn init_tracing(
    config: &ObservabilityConfig,
    level: Option<&str>,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let level = level.unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
}
