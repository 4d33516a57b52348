//! Byte fetching for source payloads and spider artifacts

use crate::core::config::HttpConfig;
use crate::core::error::FetchError;
use crate::core::url::{scheme, AnnotatedUrl};
use async_trait::async_trait;
use std::time::Duration;

/// Retrieves raw bytes for a URL
///
/// The pipeline only ever needs whole bodies, so there is no streaming
/// surface. Implementations must be shareable across concurrent source loads.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed fetcher with browser-like default headers
///
/// `file://` URLs are served from the local filesystem, and `@Header=`
/// annotations on the URL are sent as request headers.
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
    accept_language: String,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
        })
    }

    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let path = url.trim_start_matches("file://");
        Ok(tokio::fs::read(path).await?)
    }

    async fn fetch_http(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let target = AnnotatedUrl::parse(url);

        let mut builder = self
            .client
            .get(&target.url)
            .timeout(timeout)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "*/*")
            .header("Accept-Language", &self.accept_language);
        for (name, value) in &target.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout.as_secs())
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout.as_secs())
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        Ok(body.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        tracing::debug!(url = %url, timeout_secs = timeout.as_secs(), "Fetching");

        match scheme(url).as_str() {
            "file" => self.fetch_file(url).await,
            "http" | "https" => self.fetch_http(url, timeout).await,
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}
