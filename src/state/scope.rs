//! Per-request evaluation scope.
//!
//! Every compiled expression sees the same six positional names. The
//! values are rebuilt for each request and never shared across requests.

use std::collections::BTreeMap;

use crate::expression::{EvalError, Expression, Value};

/// Names visible to every configured expression, in argument order.
pub const EVALUATION_SCOPE_NAMES: [&str; 6] =
    ["data", "error", "request", "response", "stateAPI", "stateAPIs"];

/// Values bound to [`EVALUATION_SCOPE_NAMES`] for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvaluationScope {
    pub data: Value,
    pub error: Value,
    pub request: Value,
    pub response: Value,
    pub state_api: Value,
    pub state_apis: Value,
}

impl EvaluationScope {
    pub fn arguments(&self) -> [Value; 6] {
        [
            self.data.clone(),
            self.error.clone(),
            self.request.clone(),
            self.response.clone(),
            self.state_api.clone(),
            self.state_apis.clone(),
        ]
    }

    pub fn evaluate(&self, expression: &Expression) -> Result<Value, EvalError> {
        expression.evaluate(&self.arguments())
    }
}

/// Response of an executed state API as exposed to expressions.
#[derive(Debug, Clone, Default)]
pub struct StateResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub data: Value,
}

impl StateResponse {
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("status".to_string(), Value::from(self.status));
        map.insert(
            "headers".to_string(),
            Value::Object(
                self.headers
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::string(v.as_str())))
                    .collect(),
            ),
        );
        map.insert("data".to_string(), self.data.clone());
        Value::Object(map)
    }
}

/// Execution record of one state API within a request.
#[derive(Debug, Clone, Default)]
pub struct StateRecord {
    pub configuration: Value,
    pub error: Option<String>,
    pub response: Option<StateResponse>,
}

impl StateRecord {
    pub fn new(configuration: Value) -> Self {
        Self { configuration, error: None, response: None }
    }

    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("configuration".to_string(), self.configuration.clone());
        map.insert("error".to_string(), Value::from(self.error.clone()));
        map.insert(
            "response".to_string(),
            self.response.as_ref().map(StateResponse::to_value).unwrap_or_default(),
        );
        Value::Object(map)
    }
}

/// All state API records seen so far in one request, in execution order.
#[derive(Debug, Clone, Default)]
pub struct StateApiScope {
    records: Vec<(String, StateRecord)>,
}

impl StateApiScope {
    pub fn insert(&mut self, name: &str, record: StateRecord) {
        match self.records.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = record,
            None => self.records.push((name.to_string(), record)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&StateRecord> {
        self.records.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut StateRecord> {
        self.records.iter_mut().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.records
                .iter()
                .map(|(name, record)| (name.clone(), record.to_value()))
                .collect(),
        )
    }
}
