//! Configuration Resolver: builds the routing table from raw forwarders.
//!
//! # Responsibilities
//! - Layer every forwarder over `base` and every state API over the
//!   forwarder's `base` state API
//! - Compile every expression field exactly once
//! - Normalize header rules (absent source inserts, absent target removes)
//!
//! # Design Decisions
//! - Pure function of the configuration; any compile error aborts the
//!   whole resolution so a broken reload never half-applies

use std::collections::BTreeMap;

use reqwest::Method;
use thiserror::Error;

use crate::config::merge::merged;
use crate::config::schema::{
    ForwarderConfig, HeaderRuleConfig, OneOrMany, Predicate, SourceConfig, StateApiConfig,
    TargetConfig, BASE,
};
use crate::expression::{CompileError, Expression, Pattern, Value};
use crate::headers::{HeaderRule, HeaderSource, HeaderTarget, HeaderTransformations};
use crate::routing::forwarder::{Forwarder, RoutingTable};
use crate::state::api::{RequestOptions, StateApi};
use crate::state::scope::EVALUATION_SCOPE_NAMES;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("forwarders.base is missing")]
    MissingBase,

    #[error("forwarders.{forwarder}: host is missing")]
    MissingHost { forwarder: String },

    #[error("{field}: {source}")]
    Compile {
        field: String,
        #[source]
        source: CompileError,
    },

    #[error("{field}: invalid pattern: {source}")]
    Pattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("{field}: invalid HTTP method '{method}'")]
    InvalidMethod { field: String, method: String },

    #[error("{field}: name is missing")]
    UnnamedStateApi { field: String },
}

/// Resolve all forwarders except `base` into a routing table.
pub fn resolve(forwarders: &BTreeMap<String, ForwarderConfig>) -> Result<RoutingTable, ResolveError> {
    let base = forwarders.get(BASE).ok_or(ResolveError::MissingBase)?;
    let mut resolved = Vec::with_capacity(forwarders.len().saturating_sub(1));
    for (name, given) in forwarders.iter().filter(|(name, _)| *name != BASE) {
        resolved.push(resolve_forwarder(name, &merged(base, given))?);
    }
    Ok(RoutingTable::new(resolved))
}

/// Resolve one forwarder that has already been merged with `base`.
pub fn resolve_forwarder(name: &str, config: &ForwarderConfig) -> Result<Forwarder, ResolveError> {
    let field = format!("forwarders.{name}");
    let host = config
        .host
        .clone()
        .filter(|host| !host.trim().is_empty())
        .ok_or_else(|| ResolveError::MissingHost { forwarder: name.to_string() })?;
    let tls = config.tls.unwrap_or(false);
    let port = config.port.unwrap_or(if tls { 443 } else { 80 });

    let selector = match &config.use_expression {
        None => Expression::constant(Value::Bool(true)),
        Some(Predicate::Constant(value)) => Expression::constant(Value::Bool(*value)),
        Some(Predicate::Expression(source)) => compile(&format!("{field}.use_expression"), source)?,
    };

    let transformations = config.header_transformations.clone().unwrap_or_default();
    let headers = HeaderTransformations {
        send: resolve_rules(&format!("{field}.header_transformations.send"), transformations.send.as_ref())?,
        retrieve: resolve_rules(
            &format!("{field}.header_transformations.retrieve"),
            transformations.retrieve.as_ref(),
        )?,
    };

    let state_apis = resolve_state_apis(&field, config.state_apis.as_ref())?;

    Ok(Forwarder {
        name: name.to_string(),
        host,
        port,
        tls,
        selector,
        data: config.data.as_ref().map(Value::from).unwrap_or_default(),
        headers,
        state_apis,
    })
}

fn compile(field: &str, source: &str) -> Result<Expression, ResolveError> {
    Expression::compile(source, &EVALUATION_SCOPE_NAMES).map_err(|source| ResolveError::Compile {
        field: field.to_string(),
        source,
    })
}

fn resolve_rules(
    field: &str,
    rules: Option<&OneOrMany<HeaderRuleConfig>>,
) -> Result<Vec<HeaderRule>, ResolveError> {
    let rules = rules.map(OneOrMany::to_vec).unwrap_or_default();
    let mut resolved = Vec::with_capacity(rules.len());
    for (index, rule) in rules.iter().enumerate() {
        let field = format!("{field}[{index}]");
        let source = match &rule.source {
            None => HeaderSource::Insert,
            Some(SourceConfig::Expression(source)) => {
                HeaderSource::Expression(compile(&format!("{field}.source"), source)?)
            }
            Some(SourceConfig::Pattern { pattern, global, case_insensitive }) => {
                let mut flags = String::new();
                if *global {
                    flags.push('g');
                }
                if *case_insensitive {
                    flags.push('i');
                }
                let pattern = Pattern::new(pattern, &flags).map_err(|source| ResolveError::Pattern {
                    field: format!("{field}.source"),
                    source,
                })?;
                HeaderSource::Pattern(pattern)
            }
            Some(SourceConfig::Literal { literal }) => HeaderSource::Literal(literal.clone()),
        };
        let target = match &rule.target {
            None => HeaderTarget::Remove,
            Some(TargetConfig::Expression(source)) => {
                HeaderTarget::Expression(compile(&format!("{field}.target"), source)?)
            }
            Some(TargetConfig::Literal { literal }) => HeaderTarget::Literal(literal.clone()),
        };
        resolved.push(HeaderRule::new(source, target));
    }
    Ok(resolved)
}

fn resolve_state_apis(
    forwarder_field: &str,
    apis: Option<&OneOrMany<StateApiConfig>>,
) -> Result<Vec<StateApi>, ResolveError> {
    let apis = apis.map(OneOrMany::to_vec).unwrap_or_default();
    let base = apis.iter().find(|api| api.name.as_deref() == Some(BASE)).cloned();

    let mut resolved = Vec::new();
    for (index, given) in apis.iter().enumerate() {
        let field = format!("{forwarder_field}.state_apis[{index}]");
        let api = match &base {
            Some(base) => merged(base, given),
            None => given.clone(),
        };
        let name = api
            .name
            .clone()
            .ok_or_else(|| ResolveError::UnnamedStateApi { field: field.clone() })?;
        if name == BASE {
            continue;
        }
        resolved.push(resolve_state_api(&field, name, &api)?);
    }
    Ok(resolved)
}

fn resolve_state_api(field: &str, name: String, api: &StateApiConfig) -> Result<StateApi, ResolveError> {
    let url_expression = api
        .url_expression
        .as_deref()
        .map(|source| compile(&format!("{field}.url_expression"), source))
        .transpose()?;

    let mut options = RequestOptions::default();
    if let Some(given) = &api.options {
        if let Some(method) = &given.method {
            options.method = Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|_| {
                ResolveError::InvalidMethod {
                    field: format!("{field}.options.method"),
                    method: method.clone(),
                }
            })?;
        }
        options.headers = given.headers.clone().unwrap_or_default();
        options.body = given.body.clone();
    }

    let expressions = api.expressions.clone().unwrap_or_default();
    let compile_all = |kind: &str, sources: Option<OneOrMany<String>>| {
        sources
            .map(|s| s.to_vec())
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, source)| compile(&format!("{field}.expressions.{kind}[{i}]"), source))
            .collect::<Result<Vec<_>, _>>()
    };

    Ok(StateApi {
        name,
        url: api.url.clone(),
        url_expression,
        options,
        pre: compile_all("pre", expressions.pre)?,
        post: compile_all("post", expressions.post)?,
        data: api.data.as_ref().map(Value::from).unwrap_or_default(),
    })
}
