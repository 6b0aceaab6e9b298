//! Forwarder Selector.
//!
//! # Responsibilities
//! - Evaluate selection predicates in name order
//! - Return the first forwarder whose predicate is truthy
//!
//! # Design Decisions
//! - Deterministic: byte-lexicographic name order, independent of the
//!   order entries appear in the configuration file
//! - A predicate that fails to evaluate is logged and treated as no match

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::expression::Value;
use crate::routing::forwarder::{Forwarder, RoutingTable};
use crate::state::scope::{EvaluationScope, StateRecord};

/// Scope a selection predicate is evaluated in: `data` is the forwarder
/// description, `stateAPI` its own record and `stateAPIs` maps the
/// forwarder name to that record.
pub fn selection_scope(forwarder: &Forwarder, request: &Value, response: &Value) -> EvaluationScope {
    let description = forwarder.to_value();
    let record = StateRecord::new(description.clone()).to_value();
    let mut records = BTreeMap::new();
    records.insert(forwarder.name.clone(), record.clone());
    EvaluationScope {
        data: description,
        error: Value::Null,
        request: request.clone(),
        response: response.clone(),
        state_api: record,
        state_apis: Value::Object(records),
    }
}

pub fn select(table: &RoutingTable, request: &Value, response: &Value) -> Option<Arc<Forwarder>> {
    for forwarder in table.iter() {
        let scope = selection_scope(forwarder, request, response);
        match scope.evaluate(&forwarder.selector) {
            Ok(result) if result.is_truthy() => {
                tracing::info!(forwarder = %forwarder.name, "Determined forwarder");
                return Some(Arc::clone(forwarder));
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(
                    forwarder = %forwarder.name,
                    error = %error,
                    "Selection predicate failed, treating as no match"
                );
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ForwarderConfig, Predicate};
    use crate::routing::resolver::resolve;

    fn forwarder(predicate: &str) -> ForwarderConfig {
        ForwarderConfig {
            use_expression: Some(Predicate::Expression(predicate.into())),
            ..Default::default()
        }
    }

    fn table(entries: Vec<(&str, ForwarderConfig)>) -> RoutingTable {
        let mut map: BTreeMap<String, ForwarderConfig> =
            entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        map.insert(
            "base".into(),
            ForwarderConfig { host: Some("backend".into()), ..Default::default() },
        );
        resolve(&map).unwrap()
    }

    fn request(path: &str) -> Value {
        Value::from(serde_json::json!({"path": path, "headers": {}}))
    }

    #[test]
    fn first_matching_name_wins_regardless_of_declaration_order() {
        let table = table(vec![("zeta", forwarder("true")), ("alpha", forwarder("true"))]);
        let chosen = select(&table, &request("/"), &Value::Null).unwrap();
        assert_eq!(chosen.name, "alpha");
    }

    #[test]
    fn predicates_see_request_and_forwarder() {
        let table = table(vec![
            ("api", forwarder("request.path.startsWith('/api') && data.name === 'api'")),
            ("web", forwarder("stateAPIs.web.configuration.host === 'backend'")),
        ]);
        assert_eq!(select(&table, &request("/api/users"), &Value::Null).unwrap().name, "api");
        assert_eq!(select(&table, &request("/index.html"), &Value::Null).unwrap().name, "web");
    }

    #[test]
    fn failing_predicate_counts_as_no_match() {
        let table = table(vec![
            ("broken", forwarder("request.missing.field")),
            ("fallback", forwarder("true")),
        ]);
        assert_eq!(select(&table, &request("/"), &Value::Null).unwrap().name, "fallback");
    }

    #[test]
    fn no_match_returns_none() {
        let table = table(vec![("api", forwarder("false"))]);
        assert!(select(&table, &request("/"), &Value::Null).is_none());
    }
}
