use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info_span, Instrument};

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Downloads in flight across every clone of the fetcher.
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetcher is shut down")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MediaFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl MediaFetcher {
    pub fn new(config: FetchConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let client = builder.build().context("building media http client")?;

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    /// GET `url`, retrying 5xx, 429, connect errors and timeouts with capped backoff.
    pub async fn fetch(&self, system_id: &str, url: &str) -> Result<FetchedImage, FetchError> {
        let _permit = self.limit.acquire().await.map_err(|_| FetchError::Closed)?;
        self.fetch_with_retries(url)
            .instrument(info_span!("media_fetch", system_id, url))
            .await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let mut attempt = 0;
        loop {
            let retry_left = attempt < self.backoff.max_retries;
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let final_url = resp.url().to_string();
                    let content_type = resp
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = resp.bytes().await.map_err(|source| FetchError::Request {
                        url: url.to_string(),
                        source,
                    })?;
                    return Ok(FetchedImage {
                        final_url,
                        content_type,
                        body: body.to_vec(),
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    if !(retry_left && is_retryable_status(status)) {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        });
                    }
                    tracing::warn!(status = status.as_u16(), attempt, "retrying media fetch");
                }
                Err(source) => {
                    if !(retry_left && is_retryable_error(&source)) {
                        return Err(FetchError::Request {
                            url: url.to_string(),
                            source,
                        });
                    }
                    tracing::warn!(error = %source, attempt, "retrying media fetch");
                }
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

/// File extension for a stored image: from the URL path when it looks like one, else from
/// the content type, else `bin`.
pub fn image_extension(url: &str, content_type: Option<&str>) -> String {
    let from_path = reqwest::Url::parse(url).ok().and_then(|parsed| {
        let last = parsed.path_segments()?.next_back()?.to_string();
        let (_, ext) = last.rsplit_once('.')?;
        let ok = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
        ok.then(|| ext.to_ascii_lowercase())
    });
    if let Some(ext) = from_path {
        return ext;
    }
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some("image/jpeg") => "jpg",
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => "bin",
    }
    .to_string()
}

/// Feed-side name of an image: the last URL path segment, or the whole URL when it has none.
pub fn image_filename(url: &str) -> String {
    let last_segment = reqwest::Url::parse(url).ok().and_then(|parsed| {
        let segment = parsed.path_segments()?.next_back()?.to_string();
        Some(segment).filter(|s| !s.is_empty())
    });
    last_segment.unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_millis(350));
    }

    #[test]
    fn retry_classification() {
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn names_and_extensions_come_from_the_url() {
        let url = "https://cdn.example.nl/objects/123/Voorgevel.JPG?w=800";
        assert_eq!(image_filename(url), "Voorgevel.JPG");
        assert_eq!(image_extension(url, None), "jpg");
        assert_eq!(
            image_extension("https://cdn.example.nl/media/9f2c", Some("image/png; q=1")),
            "png"
        );
        assert_eq!(image_extension("not a url", None), "bin");
        assert_eq!(image_filename("https://cdn.example.nl/"), "https://cdn.example.nl/");
    }

    #[tokio::test]
    async fn unreachable_host_is_reported_after_retries() {
        let fetcher = MediaFetcher::new(FetchConfig {
            timeout: Duration::from_millis(500),
            backoff: BackoffPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            ..FetchConfig::default()
        })
        .unwrap();
        let err = fetcher
            .fetch("NVM-1", "http://127.0.0.1:1/a.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
    }
}
