//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that the `base` forwarder exists and every merged forwarder
//!   has a host and a non-zero port
//! - Check literal state API URLs and state API name uniqueness
//! - Validate listener limits
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system; expression syntax is
//!   checked later by the resolver, which compiles every expression

use std::collections::BTreeSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::merge::merged;
use crate::config::schema::{ForwarderConfig, ProxyConfig, BASE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("forwarders.base is missing")]
    MissingBase,

    #[error("no forwarder besides base is configured")]
    NoForwarders,

    #[error("forwarders.{forwarder}: host is missing or empty")]
    MissingHost { forwarder: String },

    #[error("forwarders.{forwarder}: port must be non-zero")]
    ZeroPort { forwarder: String },

    #[error("forwarders.{forwarder}.state_apis[{index}]: name is missing")]
    UnnamedStateApi { forwarder: String, index: usize },

    #[error("forwarders.{forwarder}: state api '{name}' is defined more than once")]
    DuplicateStateApi { forwarder: String, name: String },

    #[error("forwarders.{forwarder}: state api '{name}' has neither url nor url_expression")]
    MissingStateApiUrl { forwarder: String, name: String },

    #[error("forwarders.{forwarder}: state api '{name}' url '{url}' is invalid: {reason}")]
    InvalidStateApiUrl { forwarder: String, name: String, url: String, reason: String },

    #[error("{field}: '{value}' is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("listener.{field} must be greater than zero")]
    ZeroLimit { field: &'static str },
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_listener(config, &mut errors);

    match config.forwarders.get(BASE) {
        None => errors.push(ValidationError::MissingBase),
        Some(base) => {
            let mut named = 0;
            for (name, given) in config.forwarders.iter().filter(|(name, _)| *name != BASE) {
                named += 1;
                validate_forwarder(name, &merged(base, given), &mut errors);
            }
            if named == 0 {
                errors.push(ValidationError::NoForwarders);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_listener(config: &ProxyConfig, errors: &mut Vec<ValidationError>) {
    let addresses = [
        ("listener.bind_address", &config.listener.bind_address, true),
        ("admin.bind_address", &config.admin.bind_address, config.admin.enabled),
        (
            "observability.metrics_address",
            &config.observability.metrics_address,
            config.observability.metrics_enabled,
        ),
    ];
    for (field, value, used) in addresses {
        if used && value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress { field, value: value.clone() });
        }
    }

    let limits = [
        ("max_connections", config.listener.max_connections),
        ("max_header_bytes", config.listener.max_header_bytes),
        ("max_body_bytes", config.listener.max_body_bytes),
    ];
    for (field, value) in limits {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit { field });
        }
    }
}

fn validate_forwarder(name: &str, forwarder: &ForwarderConfig, errors: &mut Vec<ValidationError>) {
    if forwarder.host.as_deref().map_or(true, |host| host.trim().is_empty()) {
        errors.push(ValidationError::MissingHost { forwarder: name.to_string() });
    }
    if forwarder.port == Some(0) {
        errors.push(ValidationError::ZeroPort { forwarder: name.to_string() });
    }

    let apis = forwarder
        .state_apis
        .as_ref()
        .map(|apis| apis.to_vec())
        .unwrap_or_default();
    let base_api = apis.iter().find(|api| api.name.as_deref() == Some(BASE));
    let mut seen = BTreeSet::new();

    for (index, api) in apis.iter().enumerate() {
        let Some(api_name) = api.name.as_deref() else {
            errors.push(ValidationError::UnnamedStateApi { forwarder: name.to_string(), index });
            continue;
        };
        if !seen.insert(api_name) {
            errors.push(ValidationError::DuplicateStateApi {
                forwarder: name.to_string(),
                name: api_name.to_string(),
            });
        }
        if api_name == BASE {
            continue;
        }

        let api = match base_api {
            Some(base) => merged(base, api),
            None => api.clone(),
        };
        match (&api.url, &api.url_expression) {
            (_, Some(_)) => {}
            (Some(url), None) => {
                if let Err(e) = url::Url::parse(url) {
                    errors.push(ValidationError::InvalidStateApiUrl {
                        forwarder: name.to_string(),
                        name: api_name.to_string(),
                        url: url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            (None, None) => errors.push(ValidationError::MissingStateApiUrl {
                forwarder: name.to_string(),
                name: api_name.to_string(),
            }),
        }
    }
}
