//! Request dispatch: selection, state pipeline, forwarding.
//!
//! # Responsibilities
//! - Give every request an ID carried on its tracing span
//! - Answer 502 when no forwarder applies or the backend cannot be reached
//! - Answer with the status chosen by an aborting state API
//! - Record per-request metrics

use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;
use uuid::Uuid;

use crate::expression::Value;
use crate::http::request::BufferedRequest;
use crate::http::response::write_status;
use crate::net::Connector;
use crate::observability::metrics;
use crate::proxy::stream::{forward, ForwardContext, ForwardStats};
use crate::routing::{select, SharedTable};
use crate::state::{pipeline, PipelineOutcome, StateClient};

pub const BAD_GATEWAY: u16 = 502;

/// What happened to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    NoForwarder,
    Aborted { forwarder: String, status: u16 },
    Forwarded { forwarder: String, stats: ForwardStats },
    Failed { forwarder: String },
}

impl Disposition {
    fn outcome(&self) -> &'static str {
        match self {
            Disposition::NoForwarder => "no_forwarder",
            Disposition::Aborted { .. } => "aborted",
            Disposition::Forwarded { .. } => "forwarded",
            Disposition::Failed { .. } => "failed",
        }
    }

    fn forwarder(&self) -> &str {
        match self {
            Disposition::NoForwarder => "none",
            Disposition::Aborted { forwarder, .. }
            | Disposition::Forwarded { forwarder, .. }
            | Disposition::Failed { forwarder } => forwarder,
        }
    }
}

/// Shared per-process dispatch state.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: SharedTable,
    connector: Connector,
    state_client: StateClient,
    parse_body: bool,
}

impl Dispatcher {
    pub fn new(table: SharedTable, connector: Connector, state_client: StateClient, parse_body: bool) -> Self {
        Self {
            table,
            connector,
            state_client,
            parse_body,
        }
    }

    pub fn table(&self) -> &SharedTable {
        &self.table
    }

    /// Handle one buffered request on `client`.
    pub async fn dispatch<C>(&self, client: &mut C, request: BufferedRequest, peer: SocketAddr) -> Disposition
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + ?Sized,
    {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %request.method,
            path = %request.path(),
        );

        async move {
            let start = Instant::now();
            let disposition = self.run(client, &request, peer).await;

            metrics::record_request(disposition.forwarder(), disposition.outcome());
            if let Disposition::Forwarded { stats, .. } = &disposition {
                metrics::record_bytes("upstream", stats.upstream);
                metrics::record_bytes("downstream", stats.downstream);
            }
            tracing::debug!(
                outcome = disposition.outcome(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request finished"
            );
            disposition
        }
        .instrument(span)
        .await
    }

    async fn run<C>(&self, client: &mut C, request: &BufferedRequest, peer: SocketAddr) -> Disposition
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + ?Sized,
    {
        // Requests keep the table they started with across reloads.
        let table = self.table.load_full();
        let request_value = request.to_value(peer, self.parse_body);

        let Some(forwarder) = select(&table, &request_value, &Value::Null) else {
            tracing::warn!("No forwarder found");
            answer(client, BAD_GATEWAY).await;
            return Disposition::NoForwarder;
        };

        let states = match pipeline::run(&self.state_client, &forwarder.state_apis, &request_value, &Value::Null).await {
            PipelineOutcome::Proceed(states) => states,
            PipelineOutcome::Abort { status, .. } => {
                answer(client, status).await;
                return Disposition::Aborted {
                    forwarder: forwarder.name.clone(),
                    status,
                };
            }
        };

        let context = ForwardContext {
            client_address: peer,
            request: request_value,
            state_apis: states.to_value(),
        };

        match forward(client, request, &forwarder, &context, &self.connector).await {
            Ok(stats) if stats.downstream == 0 => {
                tracing::warn!(forwarder = %forwarder.name, "Backend closed without responding");
                answer(client, BAD_GATEWAY).await;
                Disposition::Failed {
                    forwarder: forwarder.name.clone(),
                }
            }
            Ok(stats) => Disposition::Forwarded {
                forwarder: forwarder.name.clone(),
                stats,
            },
            Err(error) => {
                tracing::error!(forwarder = %forwarder.name, error = %error, "Proxy to server error");
                if !error.responded() {
                    answer(client, BAD_GATEWAY).await;
                }
                Disposition::Failed {
                    forwarder: forwarder.name.clone(),
                }
            }
        }
    }
}

async fn answer<C>(client: &mut C, status: u16)
where
    C: AsyncWrite + Unpin + ?Sized,
{
    if let Err(error) = write_status(client, status).await {
        tracing::debug!(status, error = %error, "Could not write status to client");
    }
}
