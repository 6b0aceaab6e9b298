//! HTTP client for state API calls.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::expression::Value;
use crate::state::api::RequestOptions;
use crate::state::scope::StateResponse;

#[derive(Debug, Error)]
pub enum StateCallError {
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid JSON response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Outcome of one call. A response whose body failed to parse carries
/// both the response and the error.
#[derive(Debug, Default)]
pub struct CallResult {
    pub response: Option<StateResponse>,
    pub error: Option<StateCallError>,
}

impl CallResult {
    fn failed(error: StateCallError) -> Self {
        Self { response: None, error: Some(error) }
    }
}

/// Transport used by the state pipeline.
pub trait StateTransport: Send + Sync {
    fn call(&self, url: &str, options: &RequestOptions) -> impl Future<Output = CallResult> + Send;
}

/// Whether a content type announces a JSON body.
pub fn is_json_content_type(content_type: &str) -> bool {
    static JSON: OnceLock<Regex> = OnceLock::new();
    JSON.get_or_init(|| Regex::new(r"application/json(;.*)?$").expect("json pattern is valid"))
        .is_match(content_type)
}

/// `reqwest` backed transport.
#[derive(Debug, Clone)]
pub struct StateClient {
    http: reqwest::Client,
}

impl StateClient {
    /// `timeout` bounds the whole call including the response body.
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self { http: builder.build()? })
    }
}

impl StateTransport for StateClient {
    async fn call(&self, url: &str, options: &RequestOptions) -> CallResult {
        let parsed = match url::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(source) => {
                return CallResult::failed(StateCallError::InvalidUrl { url: url.to_string(), source })
            }
        };

        let mut request = self.http.request(options.method.clone(), parsed);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => return CallResult::failed(error.into()),
        };

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        let is_json = headers.get("content-type").is_some_and(|ct| is_json_content_type(ct));

        let mut result = CallResult {
            response: Some(StateResponse { status, headers, data: Value::Null }),
            error: None,
        };

        match response.text().await {
            Err(error) => result.error = Some(error.into()),
            Ok(text) if is_json => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(data) => {
                    if let Some(response) = result.response.as_mut() {
                        response.data = Value::from(data);
                    }
                }
                Err(error) => result.error = Some(error.into()),
            },
            Ok(_) => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(!is_json_content_type("text/html"));
        assert!(!is_json_content_type("application/json-seq+x"));
    }

    #[tokio::test]
    async fn invalid_url_is_reported_without_a_response() {
        let client = StateClient::new(None).unwrap();
        let result = client.call("not a url", &RequestOptions::default()).await;
        assert!(result.response.is_none());
        assert!(matches!(result.error, Some(StateCallError::InvalidUrl { .. })));
    }
}
