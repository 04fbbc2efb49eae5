pub mod evidence;
pub mod pollinations;

pub use evidence::EvidenceImageSource;
pub use pollinations::GeneratedImageSource;

use crate::error::{Result, VideoError};
use async_trait::async_trait;
use reqwest::Client;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; SceneComposer/0.1)";

/// Minimal GET transport the image sources are built on.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Fetches `url`, failing on any non-success status.
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
    max_bytes: usize,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .header("Referer", "https://www.google.com")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VideoError::ApiError(format!("HTTP {} from {}", status, url)));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(VideoError::ApiError(format!(
                    "response from {} exceeds {} bytes",
                    url, self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Runs `fut` unless the run is cancelled first.
pub async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VideoError::Cancelled),
        out = fut => out,
    }
}

/// Downloads `url` into `out`, rejecting bodies under `min_bytes`.
///
/// Tiny bodies are almost always error pages served with a 200.
pub async fn download_image(
    http: &dyn HttpFetch,
    url: &str,
    out: &Path,
    min_bytes: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    let data = with_cancel(cancel, http.get(url)).await?;
    if data.len() < min_bytes {
        return Err(VideoError::ApiError(format!(
            "response too small ({} bytes), likely an error page",
            data.len()
        )));
    }
    tokio::fs::write(out, &data).await?;
    debug!(url, bytes = data.len(), path = %out.display(), "image downloaded");
    Ok(())
}

pub(crate) fn truncate(s: &str, n: usize) -> String {
    match s.char_indices().nth(n) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
