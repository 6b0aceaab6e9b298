//! Status-only responses written by the proxy itself.
//!
//! # Design Decisions
//! - Used when the proxy answers instead of a backend: no forwarder, an
//!   aborting state API, a rejected request or a failed backend connect
//! - Always `Connection: close`; the connection ends after the response

use axum::http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Render the status line and headers for `status`.
pub fn status_response(status: u16) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("");
    format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
}

/// Write a bodiless response and shut the write side down.
pub async fn write_status<S>(stream: &mut S, status: u16) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(status_response(status).as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}
