use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::AppState;
use crate::routing::Forwarder;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_connections: usize,
    pub forwarders: usize,
}

#[derive(Debug, Serialize)]
pub struct ForwarderSummary {
    pub name: String,
    pub url: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub use_expression: String,
    pub state_apis: Vec<String>,
    pub send_rules: usize,
    pub retrieve_rules: usize,
}

impl From<&Forwarder> for ForwarderSummary {
    fn from(forwarder: &Forwarder) -> Self {
        Self {
            name: forwarder.name.clone(),
            url: forwarder.url(),
            host: forwarder.host.clone(),
            port: forwarder.port,
            tls: forwarder.tls,
            use_expression: forwarder.selector.source().to_string(),
            state_apis: forwarder.state_apis.iter().map(|api| api.name.clone()).collect(),
            send_rules: forwarder.headers.send.len(),
            retrieve_rules: forwarder.headers.retrieve.len(),
        }
    }
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        active_connections: state.tracker.active_count(),
        forwarders: state.table().load().len(),
    })
}

/// Forwarders of the routing table currently in effect, in selection order.
pub async fn get_forwarders(State(state): State<AppState>) -> Json<Vec<ForwarderSummary>> {
    let table = state.table().load();
    Json(table.iter().map(|forwarder| ForwarderSummary::from(forwarder.as_ref())).collect())
}
