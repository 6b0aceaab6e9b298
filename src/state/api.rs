//! Resolved state API descriptors.

use std::collections::BTreeMap;

use reqwest::Method;

use crate::expression::{Expression, Value};

/// Options of the outgoing call.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("method".to_string(), Value::string(self.method.as_str()));
        map.insert(
            "headers".to_string(),
            Value::Object(
                self.headers
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::string(v.as_str())))
                    .collect(),
            ),
        );
        map.insert("body".to_string(), Value::from(self.body.clone()));
        Value::Object(map)
    }
}

/// A named external call gated by `pre` and followed by `post` expressions.
#[derive(Debug, Clone)]
pub struct StateApi {
    pub name: String,
    pub url: Option<String>,
    /// Evaluated right before the call; wins over `url`.
    pub url_expression: Option<Expression>,
    pub options: RequestOptions,
    pub pre: Vec<Expression>,
    pub post: Vec<Expression>,
    pub data: Value,
}

impl StateApi {
    /// The `configuration` entry of this API's state record.
    pub fn configuration(&self, url: Option<&str>) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::string(self.name.as_str()));
        map.insert(
            "url".to_string(),
            url.or(self.url.as_deref()).map(Value::from).unwrap_or_default(),
        );
        map.insert("data".to_string(), self.data.clone());
        map.insert("options".to_string(), self.options.to_value());
        Value::Object(map)
    }
}
