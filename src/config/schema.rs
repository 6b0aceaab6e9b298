//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Forwarder and state API entries keep every field optional so that they
//! can be layered over the `base` template (see [`super::merge`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the template entry merged into every forwarder and state API.
pub const BASE: &str = "base";

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS, limits).
    pub listener: ListenerConfig,

    /// Forwarder definitions keyed by name; `base` is the shared template.
    pub forwarders: BTreeMap<String, ForwarderConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Parse JSON request bodies into `request.content`.
    #[serde(alias = "parseBody")]
    pub parse_body: bool,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Largest accepted request header block in bytes.
    pub max_header_bytes: usize,

    /// Largest buffered request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
            max_header_bytes: 64 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeouts in seconds; `0` disables the timeout.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment (TCP plus TLS handshake).
    pub connect_secs: u64,

    /// Whole state API call including reading the response body.
    pub state_api_secs: u64,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,
    /// API key for authentication (Bearer token).
    pub api_key: String,
    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// A single value or a list of values.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items.clone(),
            OneOrMany::One(item) => vec![item.clone()],
        }
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(items: Vec<T>) -> Self {
        OneOrMany::Many(items)
    }
}

/// Forwarder entry. Every field is optional; unset fields inherit from
/// the `base` entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwarderConfig {
    pub host: Option<String>,

    pub port: Option<u16>,

    pub tls: Option<bool>,

    /// Selection predicate; a constant or expression source.
    #[serde(alias = "useExpression")]
    pub use_expression: Option<Predicate>,

    /// Free-form data visible to expressions.
    pub data: Option<serde_json::Value>,

    #[serde(alias = "headerTransformations")]
    pub header_transformations: Option<HeaderTransformationsConfig>,

    #[serde(alias = "stateAPIs")]
    pub state_apis: Option<OneOrMany<StateApiConfig>>,
}

/// A boolean constant or an expression source.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Predicate {
    Constant(bool),
    Expression(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderTransformationsConfig {
    pub send: Option<OneOrMany<HeaderRuleConfig>>,
    pub retrieve: Option<OneOrMany<HeaderRuleConfig>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderRuleConfig {
    /// Absent: insert the target as a new header line.
    pub source: Option<SourceConfig>,
    /// Absent: remove what the source matched.
    pub target: Option<TargetConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SourceConfig {
    /// Expression source evaluated per request.
    Expression(String),
    Pattern {
        pattern: String,
        #[serde(default)]
        global: bool,
        #[serde(default)]
        case_insensitive: bool,
    },
    Literal {
        literal: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TargetConfig {
    /// Expression source evaluated per request.
    Expression(String),
    Literal {
        literal: String,
    },
}

/// State API entry. An entry named `base` is merged into every other
/// entry of the same forwarder and never executed itself.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StateApiConfig {
    pub name: Option<String>,

    /// Literal URL.
    pub url: Option<String>,

    /// Expression producing the URL; wins over `url` when both are set.
    #[serde(alias = "urlExpression")]
    pub url_expression: Option<String>,

    pub options: Option<RequestOptionsConfig>,

    pub expressions: Option<ExpressionsConfig>,

    pub data: Option<serde_json::Value>,
}

/// Options of the outgoing state API call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestOptionsConfig {
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpressionsConfig {
    pub pre: Option<OneOrMany<String>>,
    pub post: Option<OneOrMany<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_forwarders() {
        let config: ProxyConfig = toml::from_str(
            r#"
            parse_body = true

            [listener]
            bind_address = "127.0.0.1:0"

            [forwarders.base]
            host = "backend.local"
            port = 443
            tls = true

            [forwarders.api]
            useExpression = "request.path.startsWith('/api')"

            [[forwarders.api.header_transformations.send]]
            source = { pattern = "^X-Debug: .*$", case_insensitive = true }

            [[forwarders.api.header_transformations.send]]
            target = "X-Proxy: 1"

            [[forwarders.api.stateAPIs]]
            name = "captcha"
            url = "http://127.0.0.1:9000/verify"
            expressions = { pre = "true", post = ["response.status >= 500 ? 502 : null"] }
            "#,
        )
        .unwrap();

        assert!(config.parse_body);
        let api = &config.forwarders["api"];
        assert_eq!(
            api.use_expression,
            Some(Predicate::Expression("request.path.startsWith('/api')".into()))
        );
        let send = api.header_transformations.as_ref().unwrap().send.as_ref().unwrap().to_vec();
        assert_eq!(send.len(), 2);
        assert!(matches!(
            send[0].source,
            Some(SourceConfig::Pattern { case_insensitive: true, global: false, .. })
        ));
        assert!(send[1].source.is_none());
        let apis = api.state_apis.as_ref().unwrap().to_vec();
        assert_eq!(apis[0].expressions.as_ref().unwrap().pre, Some(OneOrMany::One("true".into())));
    }

    #[test]
    fn parses_json_with_single_entries() {
        let forwarder: ForwarderConfig = serde_json::from_value(serde_json::json!({
            "useExpression": true,
            "headerTransformations": {"retrieve": {"source": {"literal": "Server: nginx"}}},
            "stateAPIs": {"name": "base", "options": {"method": "POST"}}
        }))
        .unwrap();

        assert_eq!(forwarder.use_expression, Some(Predicate::Constant(true)));
        let retrieve = forwarder.header_transformations.unwrap().retrieve.unwrap().to_vec();
        assert_eq!(retrieve[0].source, Some(SourceConfig::Literal { literal: "Server: nginx".into() }));
        assert!(retrieve[0].target.is_none());
        assert_eq!(forwarder.state_apis.unwrap().to_vec()[0].name.as_deref(), Some(BASE));
    }
}
