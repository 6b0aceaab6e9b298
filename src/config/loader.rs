//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file, or a JSON file when
/// the extension is `.json`.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    parse_config(&content, is_json)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str, is_json: bool) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = if is_json {
        serde_json::from_str(content)?
    } else {
        toml::from_str(content)?
    };

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_and_toml_produce_the_same_forwarders() {
        let toml = r#"
            [forwarders.base]
            host = "backend"
            port = 8080
            [forwarders.web]
            useExpression = true
        "#;
        let json = r#"{"forwarders": {"base": {"host": "backend", "port": 8080}, "web": {"useExpression": true}}}"#;
        let from_toml = parse_config(toml, false).unwrap();
        let from_json = parse_config(json, true).unwrap();
        assert_eq!(from_toml.forwarders, from_json.forwarders);
    }

    #[test]
    fn validation_errors_are_joined() {
        let err = parse_config("[forwarders.web]\nhost = \"x\"\n", false).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert_eq!(err.to_string(), "Validation failed: forwarders.base is missing");
    }

    #[test]
    fn sample_config_loads_and_resolves() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("proxy.toml");
        let config = load_config(&path).unwrap();
        let table = crate::routing::resolve(&config.forwarders).unwrap();
        assert_eq!(table.len(), 2);
        let api = table.get("api").unwrap();
        assert_eq!(api.state_apis.len(), 1);
        assert_eq!(api.headers.retrieve.len(), 1);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config(Path::new("/nonexistent/proxy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
