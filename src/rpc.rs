use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure to obtain a JSON-RPC response body at all.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("POST {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("POST {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Plain JSON-RPC 2.0 over HTTP POST. One request, one response, no retries.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self {
            url: url.into(),
            timeout,
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn envelope(method: &str, params: Value) -> Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        })
    }

    /// Posts the request and returns the whole response body.
    ///
    /// A body carrying an `error` member is still `Ok`: interpreting it is up
    /// to the caller. Non-2xx statuses are transport failures.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let req = Self::envelope(method, params);

        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.request_error(e))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                url: self.url.clone(),
                status,
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|source| TransportError::Decode {
            url: self.url.clone(),
            source,
        })
    }

    fn request_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                url: self.url.clone(),
                timeout: self.timeout,
            }
        } else {
            TransportError::Request {
                url: self.url.clone(),
                source: e,
            }
        }
    }
}
