//! HTTP client for the chat server's REST endpoints
//!
//! Wraps reqwest::Client with the configured base URL and request timeout.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("HTTP {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Client for one chat server.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base: Url,
}

impl ChatClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self { http, base })
    }

    /// Build `<base>/<segments...>`, percent-encoding each segment.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub async fn get(&self, url: Url) -> Result<reqwest::Response, ApiError> {
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(url.as_str(), e))?;

        check_response(resp, url.as_str()).await
    }

    pub async fn post_multipart(
        &self,
        url: Url,
        form: reqwest::multipart::Form,
    ) -> Result<reqwest::Response, ApiError> {
        tracing::debug!("POST (multipart) {}", url);

        let resp = self
            .http
            .post(url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(url.as_str(), e))?;

        check_response(resp, url.as_str()).await
    }

    /// Read a response body as text.
    pub async fn text(resp: reqwest::Response, url: &str) -> Result<String, ApiError> {
        resp.text()
            .await
            .map_err(|e| ApiError::from_reqwest(url, e))
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

/// Turn a server-relative media path into an absolute URL.
///
/// Absolute `http(s)` URLs are returned unchanged; anything else is prefixed
/// with `base`.
pub fn absolute_media_url(base: &str, media_ref: &str) -> String {
    let lower = media_ref.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return media_ref.to_string();
    }

    let base = base.trim_end_matches('/');
    if media_ref.starts_with('/') {
        format!("{}{}", base, media_ref)
    } else {
        format!("{}/{}", base, media_ref)
    }
}
