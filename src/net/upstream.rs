//! Backend connections.
//!
//! One fresh connection per forwarded request, plain or TLS; nothing is
//! pooled.

use std::time::Duration;

use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::headers::authority;
use crate::net::tls::backend_connector;
use crate::net::BoxedStream;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {address} timed out")]
    Timeout { address: String },

    #[error("'{host}' is not a valid TLS server name")]
    ServerName { host: String },

    #[error("TLS handshake with {address} failed: {source}")]
    Handshake {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Opens backend connections.
#[derive(Clone)]
pub struct Connector {
    timeout: Option<Duration>,
    tls: TlsConnector,
}

impl Connector {
    /// `timeout` bounds TCP connect plus TLS handshake.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            tls: backend_connector(),
        }
    }

    pub async fn connect(&self, host: &str, port: u16, tls: bool) -> Result<BoxedStream, UpstreamError> {
        let address = authority(host, port);
        let connecting = self.open(host, &address, tls);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| UpstreamError::Timeout { address: address.clone() })?,
            None => connecting.await,
        }
    }

    async fn open(&self, host: &str, address: &str, tls: bool) -> Result<BoxedStream, UpstreamError> {
        let stream = TcpStream::connect(address).await.map_err(|source| UpstreamError::Connect {
            address: address.to_string(),
            source,
        })?;
        stream.set_nodelay(true).ok();

        if !tls {
            tracing::info!(address, "Connection to backend established");
            return Ok(Box::new(stream));
        }

        let name = host.trim_start_matches('[').trim_end_matches(']');
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| UpstreamError::ServerName { host: host.to_string() })?;
        let stream = self
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|source| UpstreamError::Handshake {
                address: address.to_string(),
                source,
            })?;
        tracing::info!(address, "TLS connection to backend established");
        Ok(Box::new(stream))
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector").field("timeout", &self.timeout).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn plain_connection_carries_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
        });

        let mut stream = Connector::new(None).connect("127.0.0.1", port, false).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn ipv6_literal_hosts_connect() {
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            // No IPv6 loopback on this host.
            return;
        };
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"v6").await.unwrap();
        });

        let mut stream = Connector::new(None).connect("::1", port, false).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"v6");
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Connector::new(Some(Duration::from_secs(2))).connect("127.0.0.1", port, false).await;
        assert!(matches!(result, Err(UpstreamError::Connect { .. })));
    }
}
