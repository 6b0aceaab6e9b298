//! Proxy server: accept loop and per-connection handling.
//!
//! # Responsibilities
//! - Accept connections within the listener's connection limit
//! - Terminate TLS when the listener is configured for it
//! - Buffer the request head and hand it to the dispatcher
//! - Stop accepting on shutdown and drain open connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::request::{read_request, RequestLimits};
use crate::http::response::write_status;
use crate::lifecycle::Shutdown;
use crate::net::tls::{self, TlsError};
use crate::net::{BoxedStream, ConnectionTracker, Connector, Listener, ListenerError};
use crate::proxy::Dispatcher;
use crate::routing::SharedTable;
use crate::state::StateClient;

/// How long open connections may keep running after shutdown.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("state API client setup failed: {0}")]
    StateClient(#[from] reqwest::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// State shared by the proxy connections and the admin API.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub tracker: ConnectionTracker,
    pub limits: RequestLimits,
    pub admin_api_key: Arc<str>,
    pub started: Instant,
}

impl AppState {
    pub fn table(&self) -> &SharedTable {
        self.dispatcher.table()
    }
}

fn timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// The proxy front-end.
pub struct ProxyServer {
    state: AppState,
    acceptor: Option<TlsAcceptor>,
}

impl ProxyServer {
    /// Build the server for `config`, routing through `table`.
    pub fn new(config: &ProxyConfig, table: SharedTable) -> Result<Self, ServerError> {
        let connector = Connector::new(timeout(config.timeouts.connect_secs));
        let state_client = StateClient::new(timeout(config.timeouts.state_api_secs))?;
        let acceptor = config.listener.tls.as_ref().map(tls::acceptor).transpose()?;

        let state = AppState {
            dispatcher: Arc::new(Dispatcher::new(table, connector, state_client, config.parse_body)),
            tracker: ConnectionTracker::new(),
            limits: RequestLimits::from(&config.listener),
            admin_api_key: Arc::from(config.admin.api_key.as_str()),
            started: Instant::now(),
        };

        Ok(Self { state, acceptor })
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Accept connections until `shutdown` triggers, then wait for open
    /// connections to finish.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ServerError> {
        let mut stop = shutdown.subscribe();
        tracing::info!(
            address = %listener.local_addr().map_err(ListenerError::Bind)?,
            tls = self.acceptor.is_some(),
            "Proxy server starting"
        );

        loop {
            let accepted = tokio::select! {
                _ = stop.recv() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(error)) => {
                    // Transient (e.g. EMFILE); keep serving.
                    tracing::warn!(error = %error, "Accept failed");
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            let guard = self.state.tracker.track();
            let span = tracing::info_span!("connection", connection_id = %guard.id(), peer = %peer);
            let state = self.state.clone();
            let acceptor = self.acceptor.clone();

            tokio::spawn(
                async move {
                    let _permit = permit;
                    let _guard = guard;
                    handle_connection(state, acceptor, stream, peer).await;
                }
                .instrument(span),
            );
        }

        tracing::info!(active = self.state.tracker.active_count(), "Proxy server stopped accepting");
        if self.state.tracker.drain(DRAIN_DEADLINE).await {
            tracing::info!("All connections drained");
        }
        Ok(())
    }
}

async fn handle_connection(state: AppState, acceptor: Option<TlsAcceptor>, stream: TcpStream, peer: SocketAddr) {
    stream.set_nodelay(true).ok();

    let mut client: BoxedStream = match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => Box::new(stream),
            Err(error) => {
                tracing::debug!(error = %error, "TLS handshake failed");
                return;
            }
        },
        None => Box::new(stream),
    };

    let request = match read_request(&mut client, state.limits).await {
        Ok(request) => request,
        Err(error) => {
            match error.status() {
                Some(status) => {
                    tracing::warn!(status, error = %error, "Rejecting request");
                    write_status(&mut client, status).await.ok();
                }
                None => tracing::debug!(error = %error, "Connection ended before a request"),
            }
            return;
        }
    };

    state.dispatcher.dispatch(&mut client, request, peer).await;
}

