use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_cookie_store::CookieStoreMutex;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::config::Timings;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0";

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("reqwest middleware error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("unexpected status: {0}")]
    Status(StatusCode),
}

impl DownloadError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DownloadError::Status(status) => Some(*status),
            DownloadError::ReqwestError(e) => e.status(),
            DownloadError::ReqwestMiddlewareError(_) => None,
        }
    }
}

/// Everything the capture pipeline needs from the network.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch a page or master playlist as text
    async fn fetch_text(&self, url: &str) -> Result<String, DownloadError>;

    /// Fetch a live media playlist. Implementations must not retry, the
    /// poller applies its own policy.
    async fn fetch_playlist(&self, url: &str) -> Result<String, DownloadError>;

    /// Fetch a whole segment body
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

pub struct HttpClient {
    pub client: ClientWithMiddleware,
    pub plain: reqwest::Client,
    pub cookies: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(proxy: Option<&str>, timings: &Timings) -> reqwest::Result<HttpClient> {
        let cookies = Arc::new(CookieStoreMutex::default());
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let mut builder = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .user_agent(USER_AGENT)
            .connect_timeout(timings.connect_timeout)
            .timeout(timings.request_timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let plain = builder.build()?;

        let client = reqwest_middleware::ClientBuilder::new(plain.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClient {
            client,
            plain,
            cookies,
        })
    }
}

fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DownloadError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(DownloadError::Status(status))
    }
}

#[async_trait]
impl Upstream for HttpClient {
    async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        let resp = check_status(self.client.get(url).send().await?)?;
        resp.text().await.map_err(|e| e.into())
    }

    async fn fetch_playlist(&self, url: &str) -> Result<String, DownloadError> {
        let resp = check_status(self.plain.get(url).send().await?)?;
        resp.text().await.map_err(|e| e.into())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut resp = check_status(self.client.get(url).send().await?)?;
        let mut body = Vec::new();

        while let Some(chunk) = resp.chunk().await? {
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    for next in ["KiB", "MiB", "GiB", "TiB"] {
        if bytes <= 1024.0 {
            break;
        }
        bytes /= 1024.0;
        suffix = next;
    }

    format!("{:.2} {}", bytes, suffix)
}
