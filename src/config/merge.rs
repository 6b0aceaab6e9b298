//! Typed right-biased deep merge.
//!
//! # Responsibilities
//! - Layer a forwarder entry over the `base` forwarder
//! - Layer a state API entry over the forwarder's `base` state API
//!
//! # Design Decisions
//! - Scalars and lists are replaced by a present override
//! - Nested option structs, string maps and JSON objects merge recursively
//! - Merging is idempotent, so applying the same override again is a no-op

use std::collections::BTreeMap;

use crate::config::schema::{
    ExpressionsConfig, ForwarderConfig, HeaderTransformationsConfig, RequestOptionsConfig,
    StateApiConfig,
};

/// Merge `other` into `self`, `other` winning on conflicts.
pub trait Merge {
    fn merge(&mut self, other: &Self);
}

/// Clone `base` and layer `overrides` over it.
pub fn merged<T: Merge + Clone>(base: &T, overrides: &T) -> T {
    let mut result = base.clone();
    result.merge(overrides);
    result
}

macro_rules! replace_on_merge {
    ($($ty:ty),* $(,)?) => {
        $(impl Merge for $ty {
            fn merge(&mut self, other: &Self) {
                *self = other.clone();
            }
        })*
    };
}

replace_on_merge!(
    String,
    bool,
    u16,
    crate::config::schema::Predicate,
    crate::config::schema::OneOrMany<crate::config::schema::HeaderRuleConfig>,
    crate::config::schema::OneOrMany<StateApiConfig>,
    crate::config::schema::OneOrMany<String>,
);

impl<T: Merge + Clone> Merge for Option<T> {
    fn merge(&mut self, other: &Self) {
        let Some(next) = other else { return };
        match self {
            Some(current) => current.merge(next),
            None => *self = Some(next.clone()),
        }
    }
}

impl<V: Merge + Clone> Merge for BTreeMap<String, V> {
    fn merge(&mut self, other: &Self) {
        for (key, value) in other {
            match self.get_mut(key) {
                Some(current) => current.merge(value),
                None => {
                    self.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

impl Merge for serde_json::Value {
    fn merge(&mut self, other: &Self) {
        match (self, other) {
            (serde_json::Value::Object(current), serde_json::Value::Object(next)) => {
                for (key, value) in next {
                    match current.get_mut(key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            current.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            (current, next) => *current = next.clone(),
        }
    }
}

impl Merge for ForwarderConfig {
    fn merge(&mut self, other: &Self) {
        self.host.merge(&other.host);
        self.port.merge(&other.port);
        self.tls.merge(&other.tls);
        self.use_expression.merge(&other.use_expression);
        self.data.merge(&other.data);
        self.header_transformations.merge(&other.header_transformations);
        self.state_apis.merge(&other.state_apis);
    }
}

impl Merge for HeaderTransformationsConfig {
    fn merge(&mut self, other: &Self) {
        self.send.merge(&other.send);
        self.retrieve.merge(&other.retrieve);
    }
}

impl Merge for StateApiConfig {
    fn merge(&mut self, other: &Self) {
        self.name.merge(&other.name);
        self.url.merge(&other.url);
        self.url_expression.merge(&other.url_expression);
        self.options.merge(&other.options);
        self.expressions.merge(&other.expressions);
        self.data.merge(&other.data);
    }
}

impl Merge for RequestOptionsConfig {
    fn merge(&mut self, other: &Self) {
        self.method.merge(&other.method);
        self.headers.merge(&other.headers);
        self.body.merge(&other.body);
    }
}

impl Merge for ExpressionsConfig {
    fn merge(&mut self, other: &Self) {
        self.pre.merge(&other.pre);
        self.post.merge(&other.post);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{OneOrMany, Predicate};
    use serde_json::json;

    fn base() -> ForwarderConfig {
        ForwarderConfig {
            host: Some("base.local".into()),
            port: Some(443),
            tls: Some(true),
            use_expression: Some(Predicate::Constant(false)),
            data: Some(json!({"tier": "gold", "limits": {"rps": 10, "burst": 20}})),
            header_transformations: Some(HeaderTransformationsConfig {
                send: Some(OneOrMany::Many(vec![Default::default()])),
                retrieve: None,
            }),
            state_apis: None,
        }
    }

    #[test]
    fn unspecified_fields_inherit_base() {
        let overrides = ForwarderConfig {
            host: Some("api.internal".into()),
            ..Default::default()
        };
        let result = merged(&base(), &overrides);
        assert_eq!(result.host.as_deref(), Some("api.internal"));
        assert_eq!(result.port, Some(443));
        assert_eq!(result.tls, Some(true));
        assert_eq!(result.data, base().data);
    }

    #[test]
    fn specified_fields_win_and_objects_merge() {
        let overrides = ForwarderConfig {
            tls: Some(false),
            data: Some(json!({"limits": {"rps": 99}, "owner": "team-a"})),
            header_transformations: Some(HeaderTransformationsConfig {
                send: Some(OneOrMany::Many(vec![])),
                retrieve: None,
            }),
            ..Default::default()
        };
        let result = merged(&base(), &overrides);
        assert_eq!(result.tls, Some(false));
        assert_eq!(
            result.data,
            Some(json!({"tier": "gold", "limits": {"rps": 99, "burst": 20}, "owner": "team-a"}))
        );
        let send = result.header_transformations.unwrap().send.unwrap();
        assert!(send.to_vec().is_empty(), "lists are replaced, not concatenated");
    }

    #[test]
    fn merging_twice_equals_merging_once() {
        let overrides = ForwarderConfig {
            port: Some(8443),
            data: Some(json!({"limits": {"burst": 1}, "tags": ["x"]})),
            ..Default::default()
        };
        let once = merged(&base(), &overrides);
        let twice = merged(&once, &overrides);
        assert_eq!(once, twice);
    }

    #[test]
    fn state_api_options_merge_header_maps() {
        let base_api = StateApiConfig {
            name: Some("base".into()),
            options: Some(RequestOptionsConfig {
                method: Some("POST".into()),
                headers: Some(BTreeMap::from([("accept".to_string(), "application/json".to_string())])),
                body: None,
            }),
            ..Default::default()
        };
        let api = StateApiConfig {
            name: Some("captcha".into()),
            options: Some(RequestOptionsConfig {
                headers: Some(BTreeMap::from([("x-key".to_string(), "secret".to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = merged(&base_api, &api);
        assert_eq!(result.name.as_deref(), Some("captcha"));
        let options = result.options.unwrap();
        assert_eq!(options.method.as_deref(), Some("POST"));
        assert_eq!(options.headers.unwrap().len(), 2);
    }
}
