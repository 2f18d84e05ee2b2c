use async_trait::async_trait;
use metron_common::types::MetricSample;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Connection failures, timeouts and 5xx responses are transient;
    /// rejected or unencodable batches are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Encode(_) => false,
        }
    }
}

/// Delivers one batch of samples to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &[MetricSample]) -> Result<(), TransportError>;
}

/// Prefixes `http://` when `endpoint` carries no scheme and drops any
/// trailing slash.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

/// Posts batches as a JSON array to `{endpoint}/updates/`.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/updates/", normalize_endpoint(endpoint)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &[MetricSample]) -> Result<(), TransportError> {
        let body = serde_json::to_vec(batch)?;
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
