//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use stateful_proxy::config::parse_config;
use stateful_proxy::http::AppState;
use stateful_proxy::net::tls::install_crypto_provider;
use stateful_proxy::net::Listener;
use stateful_proxy::{routing, ProxyServer, Shutdown};

/// A request as received by a mock server.
#[derive(Clone, Debug, Default)]
pub struct Received {
    pub head: String,
    pub body: Vec<u8>,
}

/// Requests received by a mock server, in arrival order.
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<Received>>>);

impl Captured {
    pub fn heads(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|r| r.head.clone()).collect()
    }

    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().iter().map(|r| r.body.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn push(&self, received: Received) {
        self.0.lock().unwrap().push(received);
    }
}

/// Read a request head and its `Content-Length` body from `socket`.
async fn read_request<S: AsyncRead + Unpin>(socket: &mut S) -> Received {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buffer[..end + 4]).into_owned();
            let length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            while buffer.len() < end + 4 + length {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
            let body = buffer[end + 4..].to_vec();
            return Received { head, body };
        }
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return Received {
                head: String::from_utf8_lossy(&buffer).into_owned(),
                body: Vec::new(),
            };
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

async fn respond<S: AsyncWrite + Unpin>(socket: &mut S, response: &str) {
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Render a complete `Connection: close` response.
pub fn http_response(status: &str, extra_headers: &[&str], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\n", body.len());
    for header in extra_headers {
        response.push_str(header);
        response.push_str("\r\n");
    }
    response.push_str("Connection: close\r\n\r\n");
    response.push_str(body);
    response
}

/// Start a backend that records each request head and answers with `response`.
pub async fn start_mock_backend(response: String) -> (SocketAddr, Captured) {
    start_programmable_backend(move |_| response.clone()).await
}

/// Start a backend whose response is computed from the request head.
pub async fn start_programmable_backend<F>(f: F) -> (SocketAddr, Captured)
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Captured::default();
    let f = Arc::new(f);

    let record = captured.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let record = record.clone();
            tokio::spawn(async move {
                let received = read_request(&mut socket).await;
                let response = f(&received.head);
                record.push(received);
                respond(&mut socket, &response).await;
            });
        }
    });

    (addr, captured)
}

/// Start a backend that writes each of `parts` separately, pausing in
/// between so that they arrive as distinct reads.
pub async fn start_split_backend(parts: Vec<Vec<u8>>) -> (SocketAddr, Captured) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Captured::default();

    let record = captured.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let record = record.clone();
            let parts = parts.clone();
            tokio::spawn(async move {
                record.push(read_request(&mut socket).await);
                for part in parts {
                    if socket.write_all(&part).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, captured)
}

/// Start a state API answering every call with `json`.
pub async fn start_state_api(json: serde_json::Value) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let body = json.to_string();
    let (addr, _) = start_programmable_backend(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        http_response("200 OK", &["Content-Type: application/json"], &body)
    })
    .await;
    (addr, hits)
}

/// Start a TLS backend with a fresh self-signed certificate.
pub async fn start_tls_backend(response: String) -> (SocketAddr, Captured) {
    install_crypto_provider();
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key.into())
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Captured::default();

    let record = captured.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let record = record.clone();
            let response = response.clone();
            tokio::spawn(async move {
                let Ok(mut socket) = acceptor.accept(socket).await else {
                    return;
                };
                record.push(read_request(&mut socket).await);
                respond(&mut socket, &response).await;
            });
        }
    });

    (addr, captured)
}

/// A proxy running in the background of the current test.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: AppState,
    /// Dropping every shutdown handle stops the accept loop.
    pub shutdown: Shutdown,
}

/// Start a proxy from TOML configuration; the listener binds an ephemeral
/// loopback port unless the configuration names one.
pub async fn start_proxy(config: &str) -> TestProxy {
    let text = if config.contains("[listener]") {
        config.to_string()
    } else {
        format!("{config}\n\n[listener]\nbind_address = \"127.0.0.1:0\"\n")
    };
    let config = parse_config(&text, false).unwrap();
    let table = routing::shared(routing::resolve(&config.forwarders).unwrap());

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ProxyServer::new(&config, table).unwrap();
    let state = server.state();
    let shutdown = Shutdown::new();

    let stop = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, stop).await.unwrap();
    });

    TestProxy { addr, state, shutdown }
}

/// Send raw bytes and read until the proxy closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

pub async fn get(addr: SocketAddr, path: &str) -> String {
    send_raw(addr, format!("GET {path} HTTP/1.1\r\nHost: proxy.local\r\n\r\n").as_bytes()).await
}
