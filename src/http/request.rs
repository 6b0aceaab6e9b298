//! Inbound request buffering and parsing.
//!
//! # Responsibilities
//! - Buffer the request until the header terminator is seen
//! - Enforce header and body size limits before forwarding
//! - Parse the request line and headers for routing decisions
//! - Describe the request as an expression value
//!
//! # Design Decisions
//! - The raw bytes are kept untouched; forwarding replays them and only
//!   the header block is rewritten as text
//! - Bodies are buffered only when announced by `Content-Length`;
//!   chunked bodies stay on the socket and are relayed as bytes

use std::collections::BTreeMap;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::ListenerConfig;
use crate::expression::Value;
use crate::headers::header_end;
use crate::state::client::is_json_content_type;

const MAX_HEADERS: usize = 100;
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("connection closed before a request was received")]
    Closed,

    #[error("connection closed in the middle of the request")]
    Incomplete,

    #[error("request head exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("request body of {length} bytes exceeds {limit} bytes")]
    BodyTooLarge { length: usize, limit: usize },

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RequestError {
    /// Status to answer the client with, if the connection is still usable.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::HeaderTooLarge { .. } => Some(431),
            RequestError::BodyTooLarge { .. } => Some(413),
            RequestError::Malformed(_) => Some(400),
            RequestError::Closed | RequestError::Incomplete | RequestError::Io(_) => None,
        }
    }
}

impl From<httparse::Error> for RequestError {
    fn from(error: httparse::Error) -> Self {
        RequestError::Malformed(error.to_string())
    }
}

/// Size limits applied while buffering.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl From<&ListenerConfig> for RequestLimits {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            max_header_bytes: config.max_header_bytes,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// A request whose header block (and `Content-Length` body) has been read.
#[derive(Debug, Clone)]
pub struct BufferedRequest {
    /// Every byte read from the client so far.
    pub buffer: Vec<u8>,
    /// Length of the header block including the blank line.
    pub head_len: usize,
    pub method: String,
    pub target: String,
    /// Minor HTTP/1 version.
    pub version: u8,
    /// Header names in their original case, in order.
    pub headers: Vec<(String, String)>,
    pub content_length: Option<usize>,
}

impl BufferedRequest {
    /// The header block as text.
    pub fn head(&self) -> String {
        String::from_utf8_lossy(&self.buffer[..self.head_len]).into_owned()
    }

    /// Bytes read after the header block.
    pub fn rest(&self) -> &[u8] {
        &self.buffer[self.head_len..]
    }

    /// The buffered body, limited to `Content-Length`.
    pub fn body(&self) -> &[u8] {
        let rest = self.rest();
        match self.content_length {
            Some(length) => &rest[..length.min(rest.len())],
            None => &[],
        }
    }

    /// First value of header `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn path(&self) -> &str {
        self.target.split_once('?').map_or(self.target.as_str(), |(path, _)| path)
    }

    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// The request as seen by expressions.
    pub fn to_value(&self, remote: SocketAddr, parse_body: bool) -> Value {
        let mut headers: BTreeMap<String, Value> = BTreeMap::new();
        for (name, value) in &self.headers {
            headers
                .entry(name.to_ascii_lowercase())
                .and_modify(|existing| {
                    if let Value::String(existing) = existing {
                        existing.push_str(", ");
                        existing.push_str(value);
                    }
                })
                .or_insert_with(|| Value::string(value.as_str()));
        }

        let query: BTreeMap<String, Value> = self
            .query()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .map(|(key, value)| (key.into_owned(), Value::string(value.into_owned())))
                    .collect()
            })
            .unwrap_or_default();

        let body = self.body();
        let content = if parse_body && !body.is_empty() {
            self.parse_content(body)
        } else {
            Value::Null
        };

        let mut map = BTreeMap::new();
        map.insert("method".to_string(), Value::string(self.method.as_str()));
        map.insert("url".to_string(), Value::string(self.target.as_str()));
        map.insert("path".to_string(), Value::string(self.path()));
        map.insert("query".to_string(), Value::Object(query));
        map.insert("httpVersion".to_string(), Value::string(format!("1.{}", self.version)));
        map.insert("headers".to_string(), Value::Object(headers));
        map.insert("remoteAddress".to_string(), Value::string(remote.ip().to_string()));
        map.insert(
            "body".to_string(),
            if body.is_empty() {
                Value::Null
            } else {
                Value::string(String::from_utf8_lossy(body).into_owned())
            },
        );
        map.insert("content".to_string(), content);
        Value::Object(map)
    }

    fn parse_content(&self, body: &[u8]) -> Value {
        if !self.header("content-type").is_some_and(is_json_content_type) {
            return Value::Null;
        }
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(content) => Value::from(content),
            Err(error) => {
                tracing::warn!(error = %error, "Could not parse request body as JSON");
                Value::Null
            }
        }
    }
}

/// Read one request head (and its `Content-Length` body) from `stream`.
pub async fn read_request<S>(stream: &mut S, limits: RequestLimits) -> Result<BufferedRequest, RequestError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(READ_CHUNK);

    let head_len = loop {
        if let Some(end) = header_end(&buffer) {
            break end;
        }
        if buffer.len() > limits.max_header_bytes {
            return Err(RequestError::HeaderTooLarge { limit: limits.max_header_bytes });
        }
        if read_some(stream, &mut buffer).await? == 0 {
            return Err(if buffer.is_empty() { RequestError::Closed } else { RequestError::Incomplete });
        }
    };
    if head_len > limits.max_header_bytes {
        return Err(RequestError::HeaderTooLarge { limit: limits.max_header_bytes });
    }

    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut slots);
    match parsed.parse(&buffer[..head_len]) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(RequestError::Malformed("incomplete request head".to_string())),
        Err(httparse::Error::TooManyHeaders) => {
            return Err(RequestError::HeaderTooLarge { limit: limits.max_header_bytes })
        }
        Err(error) => return Err(error.into()),
    }

    let method = parsed.method.unwrap_or_default().to_string();
    let target = parsed.path.unwrap_or_default().to_string();
    let version = parsed.version.unwrap_or(1);
    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| {
            value
                .parse::<usize>()
                .map_err(|_| RequestError::Malformed(format!("invalid Content-Length '{value}'")))
        })
        .transpose()?;

    if let Some(length) = content_length {
        if length > limits.max_body_bytes {
            return Err(RequestError::BodyTooLarge { length, limit: limits.max_body_bytes });
        }
        while buffer.len() < head_len + length {
            if read_some(stream, &mut buffer).await? == 0 {
                return Err(RequestError::Incomplete);
            }
        }
    }

    Ok(BufferedRequest {
        buffer,
        head_len,
        method,
        target,
        version,
        headers,
        content_length,
    })
}

async fn read_some<S: AsyncRead + Unpin>(stream: &mut S, buffer: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    let n = stream.read(&mut chunk).await?;
    buffer.extend_from_slice(&chunk[..n]);
    Ok(n)
}
