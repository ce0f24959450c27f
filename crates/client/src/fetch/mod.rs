//! Network seam used by every strategy and by submission replay.
//!
//! ### Contract
//! - Any HTTP status counts as a network-level answer and is returned as `Ok`.
//! - Only transport failures (refused, DNS, TLS, reset) and client timeouts are `Err`.
//! - Relative URLs resolve against the configured origin.
//!
//! ### Cache bypass
//! - `CacheMode::Reload` sends `Cache-Control: no-cache` and `Pragma: no-cache`
//!   so install-time pre-population always reflects the deployed version.

pub mod url;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, header};
use std::time::{Duration, Instant};

pub use self::url::{UrlError, canonicalize, same_origin};

use waypost_core::{CacheMode, Error, FetchRequest, Response, WorkerConfig};

/// Something that can put a request on the wire.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest, mode: CacheMode) -> Result<Response, Error>;
}

/// Configuration for the HTTP network.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Origin relative request URLs resolve against.
    pub origin: ::url::Url,

    /// User agent string (default: "waypost-worker/0.1")
    pub user_agent: String,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl FetchConfig {
    pub fn from_worker_config(config: &WorkerConfig) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self { origin, user_agent: config.user_agent.clone(), timeout: config.fetch_timeout(), max_redirects: 5 })
    }
}

/// reqwest-backed network.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    http: Client,
    config: FetchConfig,
}

impl HttpNetwork {
    /// Create a new network client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::NetworkFailure(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest, mode: CacheMode) -> Result<Response, Error> {
        let start = Instant::now();
        let url = canonicalize(&request.url, &self.config.origin).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| Error::InvalidInput(format!("invalid method {}: {e}", request.method)))?;

        let mut builder = self.http.request(method, url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if mode == CacheMode::Reload {
            builder = builder
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache");
        }
        if let Some(body) = &request.body {
            builder = builder.body(Bytes::copy_from_slice(body));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.config.timeout.as_millis() as u64)
            } else {
                Error::NetworkFailure(format!("{url}: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::NetworkFailure(format!("failed to read response from {url}: {e}")))?;

        tracing::debug!(
            url = %url,
            status,
            bytes = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fetched"
        );

        Ok(Response { status, headers, body: body.to_vec() })
    }
}
