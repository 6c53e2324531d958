//! Client for the remote analysis service.
//!
//! The service is consumed as an opaque endpoint: `POST {base}/api/analyze`
//! with `{"url": ...}` and a JSON verdict in return.  Every request is raced
//! against a fixed timeout; dropping the request future on expiry cancels the
//! connection and releases the timer along with it.

use std::time::Duration;

use thiserror::Error;

use crate::normalize::NormalizedUrl;
use crate::outcome::AnalysisOutcome;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_ANALYZE_PATH: &str = "/api/analyze";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 4_000;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("analysis service responded with status {0}")]
    Status(u16),
    #[error("analysis request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("analysis response could not be decoded: {0}")]
    Decode(String),
}

/// Anything that can classify a URL.  The pipeline only depends on this
/// trait, so tests can substitute a scripted implementation.
#[async_trait::async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, url: &NormalizedUrl) -> Result<AnalysisOutcome, AnalysisError>;
}

#[derive(Clone, Debug)]
pub struct HttpAnalysisConfig {
    pub base_url: String,
    pub analyze_path: String,
    pub timeout_ms: u64,
    pub bearer_token: Option<String>,
}

impl Default for HttpAnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            analyze_path: DEFAULT_ANALYZE_PATH.to_string(),
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            bearer_token: None,
        }
    }
}

impl HttpAnalysisConfig {
    /// Join base and path, tolerating a trailing slash on the base and a
    /// missing leading slash on the path.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.analyze_path.trim();
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

#[derive(serde::Serialize)]
struct AnalyzeBody<'a> {
    url: &'a str,
}

pub struct HttpAnalysisClient {
    endpoint: String,
    timeout: Duration,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl HttpAnalysisClient {
    pub fn new(cfg: &HttpAnalysisConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(cfg, client))
    }

    pub fn with_client(cfg: &HttpAnalysisConfig, client: reqwest::Client) -> Self {
        Self {
            endpoint: cfg.endpoint(),
            timeout: Duration::from_millis(cfg.timeout_ms),
            bearer_token: cfg.bearer_token.clone(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, url: &NormalizedUrl) -> Result<AnalysisOutcome, AnalysisError> {
        let mut rb = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeBody { url: url.as_str() });
        if let Some(tok) = &self.bearer_token {
            rb = rb.bearer_auth(tok);
        }
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AnalysisError::Status(status.as_u16()));
        }
        let text = resp.text().await?;
        let body: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| AnalysisError::Decode(e.to_string()))?;
        if !body.is_object() {
            return Err(AnalysisError::Decode("expected a JSON object".into()));
        }
        Ok(AnalysisOutcome::from_response(body))
    }
}

#[async_trait::async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, url: &NormalizedUrl) -> Result<AnalysisOutcome, AnalysisError> {
        match tokio::time::timeout(self.timeout, self.request(url)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}
