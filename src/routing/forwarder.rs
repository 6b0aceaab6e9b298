//! Resolved forwarders and the routing table.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::expression::{Expression, Value};
use crate::headers::{authority, host_value, HeaderTransformations};
use crate::state::api::StateApi;

/// One backend together with its selection predicate, header rules and
/// state APIs. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct Forwarder {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub selector: Expression,
    pub data: Value,
    pub headers: HeaderTransformations,
    pub state_apis: Vec<StateApi>,
}

impl Forwarder {
    /// `host:port` for opening the backend connection.
    pub fn address(&self) -> String {
        authority(&self.host, self.port)
    }

    /// Value written into the request's `Host` header.
    pub fn host_header(&self) -> String {
        host_value(&self.host, self.port, self.tls)
    }

    pub fn url(&self) -> String {
        format!("http{}://{}", if self.tls { "s" } else { "" }, self.host_header())
    }

    /// Description of the forwarder exposed to expressions.
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::string(self.name.as_str()));
        map.insert("host".to_string(), Value::string(self.host.as_str()));
        map.insert("port".to_string(), Value::from(self.port));
        map.insert("tls".to_string(), Value::from(self.tls));
        map.insert("data".to_string(), self.data.clone());
        map.insert(
            "stateAPIs".to_string(),
            Value::Array(self.state_apis.iter().map(|api| Value::string(api.name.as_str())).collect()),
        );
        Value::Object(map)
    }
}

/// Forwarders keyed by name. Iteration is in byte-lexicographic name order.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    forwarders: BTreeMap<String, Arc<Forwarder>>,
}

impl RoutingTable {
    pub fn new(forwarders: impl IntoIterator<Item = Forwarder>) -> Self {
        Self {
            forwarders: forwarders
                .into_iter()
                .map(|f| (f.name.clone(), Arc::new(f)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Forwarder>> {
        self.forwarders.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Forwarder>> {
        self.forwarders.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.forwarders.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forwarders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwarders.is_empty()
    }
}
