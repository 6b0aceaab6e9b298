//! Stream Proxy: relays one buffered request and everything after it
//! between the client and a backend.
//!
//! # Responsibilities
//! - Open the backend connection (plain or TLS)
//! - Rewrite and transform the request head, then replay buffered bytes
//! - Transform the response head when retrieve rules exist
//! - Pipe all remaining bytes in both directions
//!
//! # Design Decisions
//! - Two directional copy loops joined on the backend side: the relay ends
//!   when the backend stops sending, a client half-close only shuts the
//!   backend's write side
//! - After the first request the connection is a byte pipe; later
//!   requests on the same connection reach the same backend unmodified

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::expression::Value;
use crate::headers::{header_end, rewrite_host, transform, upgrade_http_version};
use crate::http::request::BufferedRequest;
use crate::net::{Connector, UpstreamError};
use crate::routing::Forwarder;
use crate::state::scope::EvaluationScope;

/// Largest backend response head that is buffered for retrieve rules.
/// A longer head is relayed untransformed.
const MAX_RESPONSE_HEAD: usize = 64 * 1024;
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Connect(#[from] UpstreamError),

    #[error("sending request to backend failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("relaying failed: {source}")]
    Relay {
        #[source]
        source: std::io::Error,
        /// Whether backend bytes already reached the client.
        responded: bool,
    },
}

impl ProxyError {
    /// Whether the client has already received part of a response; if not
    /// the caller can still answer with a status.
    pub fn responded(&self) -> bool {
        matches!(self, ProxyError::Relay { responded: true, .. })
    }
}

/// Byte counts of one relayed connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Client to backend.
    pub upstream: u64,
    /// Backend to client.
    pub downstream: u64,
}

/// Everything header rules may look at besides the forwarder itself.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub client_address: SocketAddr,
    pub request: Value,
    /// `stateAPIs` as left by the state pipeline.
    pub state_apis: Value,
}

impl ForwardContext {
    fn scope(&self, forwarder: &Forwarder, response: Value) -> EvaluationScope {
        let mut backend = BTreeMap::new();
        backend.insert("name".to_string(), Value::string(forwarder.name.as_str()));
        backend.insert("host".to_string(), Value::string(forwarder.host.as_str()));
        backend.insert("port".to_string(), Value::from(forwarder.port));
        backend.insert("tls".to_string(), Value::from(forwarder.tls));
        backend.insert("address".to_string(), Value::string(forwarder.address()));

        let mut client = BTreeMap::new();
        client.insert("address".to_string(), Value::string(self.client_address.ip().to_string()));
        client.insert("port".to_string(), Value::from(self.client_address.port()));

        let mut data = BTreeMap::new();
        data.insert("client".to_string(), Value::Object(client));
        data.insert("backend".to_string(), Value::Object(backend));

        EvaluationScope {
            data: Value::Object(data),
            error: Value::Null,
            request: self.request.clone(),
            response,
            state_api: Value::Null,
            state_apis: self.state_apis.clone(),
        }
    }
}

/// Request head as sent to `forwarder`: HTTP/1.0 upgraded on TLS, `Host`
/// rewritten, then the send rules applied in order.
pub fn prepare_request_head(head: &str, forwarder: &Forwarder, scope: &EvaluationScope) -> String {
    let head = if forwarder.tls {
        upgrade_http_version(head)
    } else {
        head.to_string()
    };
    let head = rewrite_host(&head, &forwarder.host_header());
    transform(&head, &forwarder.headers.send, scope)
}

/// Describe a raw response head as `{status, statusMessage, headers}`.
/// Heads that do not parse yield null.
pub fn response_value(head: &[u8]) -> Value {
    let mut slots = [httparse::EMPTY_HEADER; 100];
    let mut response = httparse::Response::new(&mut slots);
    if !matches!(response.parse(head), Ok(httparse::Status::Complete(_))) {
        return Value::Null;
    }

    let mut headers = BTreeMap::new();
    for header in response.headers.iter() {
        headers.insert(
            header.name.to_ascii_lowercase(),
            Value::string(String::from_utf8_lossy(header.value).into_owned()),
        );
    }

    let mut map = BTreeMap::new();
    map.insert("status".to_string(), Value::from(response.code.unwrap_or_default()));
    map.insert("statusMessage".to_string(), Value::string(response.reason.unwrap_or_default()));
    map.insert("headers".to_string(), Value::Object(headers));
    Value::Object(map)
}

/// Forward `request` to `forwarder` and relay until the backend is done.
pub async fn forward<C>(
    client: &mut C,
    request: &BufferedRequest,
    forwarder: &Forwarder,
    context: &ForwardContext,
    connector: &Connector,
) -> Result<ForwardStats, ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut backend = connector.connect(&forwarder.host, forwarder.port, forwarder.tls).await?;

    let head = request.head();
    tracing::debug!(head = %head, "Got request header from client");
    let head = prepare_request_head(&head, forwarder, &context.scope(forwarder, Value::Null));
    tracing::debug!(head = %head, "Send request header to backend");

    backend.write_all(head.as_bytes()).await.map_err(ProxyError::Send)?;
    backend.write_all(request.rest()).await.map_err(ProxyError::Send)?;
    backend.flush().await.map_err(ProxyError::Send)?;
    let replayed = (head.len() + request.rest().len()) as u64;

    let responded = AtomicBool::new(false);
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(&mut backend);

    let upstream = async {
        let n = tokio::io::copy(&mut client_read, &mut backend_write).await?;
        backend_write.shutdown().await?;
        Ok::<u64, std::io::Error>(n)
    };

    let downstream = async {
        let first = if forwarder.headers.retrieve.is_empty() {
            read_chunk(&mut backend_read).await?
        } else {
            let head = read_response_head(&mut backend_read).await?;
            transform_response_head(head, forwarder, context)
        };
        if first.is_empty() {
            return Ok(0);
        }
        client_write.write_all(&first).await?;
        responded.store(true, Ordering::Relaxed);

        let n = tokio::io::copy(&mut backend_read, &mut client_write).await?;
        client_write.shutdown().await?;
        Ok::<u64, std::io::Error>(first.len() as u64 + n)
    };

    tokio::pin!(upstream, downstream);
    let mut sent: Option<u64> = None;
    let received = loop {
        tokio::select! {
            result = &mut upstream, if sent.is_none() => match result {
                Ok(n) => sent = Some(n),
                Err(source) => {
                    return Err(ProxyError::Relay {
                        source,
                        responded: responded.load(Ordering::Relaxed),
                    })
                }
            },
            result = &mut downstream => break result,
        }
    };

    match received {
        Ok(downstream) => Ok(ForwardStats {
            upstream: replayed + sent.unwrap_or_default(),
            downstream,
        }),
        Err(source) => Err(ProxyError::Relay {
            source,
            responded: responded.load(Ordering::Relaxed),
        }),
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; READ_CHUNK];
    let n = reader.read(&mut chunk).await?;
    chunk.truncate(n);
    Ok(chunk)
}

/// Read until the response head is complete, the backend closes, or the
/// head grows past `MAX_RESPONSE_HEAD`.
async fn read_response_head<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    while header_end(&buffer).is_none() && buffer.len() <= MAX_RESPONSE_HEAD {
        let chunk = read_chunk(reader).await?;
        if chunk.is_empty() {
            break;
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

fn transform_response_head(buffer: Vec<u8>, forwarder: &Forwarder, context: &ForwardContext) -> Vec<u8> {
    let Some(end) = header_end(&buffer) else {
        tracing::warn!(bytes = buffer.len(), "Response head incomplete, relaying untransformed");
        return buffer;
    };

    let head = String::from_utf8_lossy(&buffer[..end]);
    tracing::info!(head = %head, "Got response header from backend");

    let scope = context.scope(forwarder, response_value(&buffer[..end]));
    let head = transform(&head, &forwarder.headers.retrieve, &scope);
    tracing::info!(head = %head, "Send response header to client");

    let mut out = head.into_bytes();
    out.extend_from_slice(&buffer[end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expression;
    use crate::headers::{HeaderRule, HeaderTransformations};
    use crate::state::scope::EVALUATION_SCOPE_NAMES;

    fn forwarder(tls: bool, port: u16) -> Forwarder {
        Forwarder {
            name: "svc".to_string(),
            host: "api.internal".to_string(),
            port,
            tls,
            selector: Expression::constant(Value::Bool(true)),
            data: Value::Null,
            headers: HeaderTransformations::default(),
            state_apis: Vec::new(),
        }
    }

    fn context() -> ForwardContext {
        ForwardContext {
            client_address: "192.0.2.1:40000".parse().unwrap(),
            request: Value::Null,
            state_apis: Value::Null,
        }
    }

    #[test]
    fn tls_head_is_upgraded_and_host_rewritten() {
        let f = forwarder(true, 443);
        let scope = context().scope(&f, Value::Null);
        let head = prepare_request_head("GET / HTTP/1.0\r\nHost: proxy:8080\r\nAccept: */*\r\n\r\n", &f, &scope);
        assert_eq!(head, "GET / HTTP/1.1\r\nHost: api.internal\r\nAccept: */*\r\n\r\n");
    }

    #[test]
    fn plain_head_keeps_version_and_gets_port() {
        let f = forwarder(false, 8080);
        let scope = context().scope(&f, Value::Null);
        let head = prepare_request_head("GET / HTTP/1.0\r\nhost: proxy\r\n\r\n", &f, &scope);
        assert_eq!(head, "GET / HTTP/1.0\r\nhost: api.internal:8080\r\n\r\n");
    }

    #[test]
    fn send_rules_see_connection_data() {
        let mut f = forwarder(false, 80);
        f.headers.send.push(HeaderRule::new(
            crate::headers::HeaderSource::Insert,
            crate::headers::HeaderTarget::Expression(
                Expression::compile("`X-Forwarded-For: ${data.client.address}`", &EVALUATION_SCOPE_NAMES)
                    .unwrap(),
            ),
        ));
        let scope = context().scope(&f, Value::Null);
        let head = prepare_request_head("GET / HTTP/1.1\r\nHost: proxy\r\n\r\n", &f, &scope);
        assert_eq!(
            head,
            "GET / HTTP/1.1\r\nHost: api.internal\r\nX-Forwarded-For: 192.0.2.1\r\n\r\n"
        );
    }

    #[test]
    fn response_head_is_described() {
        let value = response_value(b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\n");
        assert_eq!(value.get("status").and_then(Value::as_f64), Some(404.0));
        assert_eq!(
            value.get("headers").and_then(|h| h.get("content-type")).and_then(Value::as_str),
            Some("text/plain")
        );
        assert!(response_value(b"garbage").is_null());
    }

    #[test]
    fn retrieve_rules_rewrite_only_the_head() {
        let mut f = forwarder(false, 80);
        f.headers.retrieve.push(HeaderRule::insert("X-Proxied: yes"));
        let buffer = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec();
        let out = transform_response_head(buffer, &f, &context());
        assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nX-Proxied: yes\r\n\r\nok");
    }
}
