//! Artifact retrieval.
//!
//! A [`Fetcher`] turns a source URL into bytes held in memory. Nothing is
//! written to disk here; the bytes are handed to the verifier first.
//! [`HttpFetcher`] serves `http`/`https` through a shared `reqwest::Client`
//! and reads `file://` URLs from the local filesystem.

use crate::error::{FetchError, FetchErrorKind};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{StatusCode, Url};
use std::future::Future;
use std::time::Duration;

/// Per-request ceiling for connecting; the overall budget is the caller's timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Don't trust Content-Length beyond this when preallocating
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Retrieves artifact bytes for a URL
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Fetcher over HTTP(S) and `file://`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    progress: bool,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(format!("keg/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            progress: false,
        }
    }

    /// Draw a progress bar on stderr while downloading
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    async fn fetch_http(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::new(FetchErrorKind::Transport, url.as_str(), e.to_string()))?;

        let status = response.status();
        if let Some(kind) = classify_status(status) {
            return Err(FetchError::new(kind, url.as_str(), format!("HTTP {}", status)));
        }

        let pb = self.progress.then(|| download_bar(&url, response.content_length()));
        let capacity = response.content_length().unwrap_or(0).min(MAX_PREALLOC);
        let mut bytes = Vec::with_capacity(capacity as usize);

        loop {
            let chunk = response.chunk().await.map_err(|e| {
                FetchError::new(FetchErrorKind::Transport, url.as_str(), e.to_string())
            })?;
            let Some(chunk) = chunk else {
                break;
            };
            bytes.extend_from_slice(&chunk);
            if let Some(pb) = &pb {
                pb.set_position(bytes.len() as u64);
            }
        }

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        tracing::debug!(url = %url, bytes = bytes.len(), "downloaded");
        Ok(bytes)
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url)
            .map_err(|e| FetchError::new(FetchErrorKind::Transport, url, e.to_string()))?;

        match parsed.scheme() {
            "http" | "https" => self.fetch_http(parsed).await,
            "file" => read_file_url(&parsed).await,
            other => Err(FetchError::new(
                FetchErrorKind::Transport,
                url,
                format!("unsupported scheme `{}`", other),
            )),
        }
    }
}

/// Map an HTTP status onto a fetch failure, or `None` on success
pub fn classify_status(status: StatusCode) -> Option<FetchErrorKind> {
    if status.is_success() {
        None
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        Some(FetchErrorKind::NotFound)
    } else if status.is_server_error() {
        Some(FetchErrorKind::Server)
    } else {
        Some(FetchErrorKind::Transport)
    }
}

async fn read_file_url(url: &Url) -> Result<Vec<u8>, FetchError> {
    let path = url.to_file_path().map_err(|()| {
        FetchError::new(FetchErrorKind::Transport, url.as_str(), "not a local path")
    })?;

    tokio::fs::read(&path).await.map_err(|e| {
        let kind = if e.kind() == std::io::ErrorKind::NotFound {
            FetchErrorKind::NotFound
        } else {
            FetchErrorKind::Transport
        };
        FetchError::new(kind, url.as_str(), e.to_string())
    })
}

fn download_bar(url: &Url, total: Option<u64>) -> ProgressBar {
    let pb = ProgressBar::new(total.unwrap_or(0));
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
        .to_string();
    pb.set_message(format!("⬇ {}", name));
    pb
}
