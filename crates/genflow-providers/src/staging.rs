//! Input staging
//!
//! Turns a caller's source asset into a URL a provider can fetch:
//!
//! - inline payloads (data URI or raw bytes) are decoded and uploaded
//! - external URLs are downloaded with browser-like headers and re-hosted, falling back
//!   to the original URL when every download attempt fails
//!
//! Every staged URL gets a HEAD probe afterwards. The probe only logs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE, REFERER, USER_AGENT};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

use genflow_core::models::{SourceAsset, StagedAsset};
use genflow_core::{GenflowError, GenflowResult};
use genflow_storage::{extension_for_mime, staging_key, Storage};

use crate::http::build_client;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded retry for source downloads: `attempts` tries, doubling delay, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (0-based): 1s, 2s, 4s, ... capped
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct Stager {
    storage: Arc<dyn Storage>,
    client: Client,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Stager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stager")
            .field("backend", &self.storage.backend_type())
            .field("retry", &self.retry)
            .finish()
    }
}

impl Stager {
    pub fn new(storage: Arc<dyn Storage>) -> anyhow::Result<Self> {
        Ok(Self {
            storage,
            client: build_client(DOWNLOAD_TIMEOUT, "input staging")?,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stage `asset`, scoping the storage key under `resource_id` when given
    #[tracing::instrument(skip(self, asset), fields(source = %asset.describe()))]
    pub async fn stage(
        &self,
        asset: &SourceAsset,
        resource_id: Option<&str>,
    ) -> GenflowResult<StagedAsset> {
        let staged = match asset {
            SourceAsset::DataUri { data_uri } => {
                let (mime, bytes) = decode_data_uri(data_uri)?;
                self.upload(asset.describe(), bytes, &mime, resource_id)
                    .await?
            }
            SourceAsset::Bytes { bytes, mime } => {
                if bytes.is_empty() {
                    return Err(GenflowError::Input("inline asset is empty".to_string()));
                }
                self.upload(asset.describe(), bytes.clone(), mime, resource_id)
                    .await?
            }
            SourceAsset::Url { url } => self.stage_url(url, resource_id).await?,
        };

        self.probe(&staged.durable_url).await;
        Ok(staged)
    }

    async fn stage_url(&self, url: &str, resource_id: Option<&str>) -> GenflowResult<StagedAsset> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| GenflowError::Input(format!("invalid source URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GenflowError::Input(format!(
                "unsupported source URL scheme '{}'",
                parsed.scheme()
            )));
        }

        match self.download_with_retry(&parsed).await {
            Some((bytes, mime)) => self.upload(url.to_string(), bytes, &mime, resource_id).await,
            None => {
                tracing::warn!(
                    url = %url,
                    attempts = self.retry.attempts,
                    "Source download failed, handing the original URL to the provider"
                );
                Ok(StagedAsset::passthrough(url))
            }
        }
    }

    async fn download_with_retry(&self, url: &reqwest::Url) -> Option<(Vec<u8>, String)> {
        let referer = format!("{}/", url.origin().ascii_serialization());

        for attempt in 0..self.retry.attempts {
            let start = Instant::now();
            let result = self
                .client
                .get(url.clone())
                .header(USER_AGENT, BROWSER_USER_AGENT)
                .header(ACCEPT, IMAGE_ACCEPT)
                .header(REFERER, &referer)
                .send()
                .await;

            let failure = match result {
                Ok(response) if response.status().is_success() => {
                    let mime = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                        .filter(|v| !v.is_empty() && v != "application/octet-stream")
                        .unwrap_or_else(|| mime_from_path(url.path()).to_string());

                    match response.bytes().await {
                        Ok(bytes) if !bytes.is_empty() => {
                            tracing::debug!(
                                url = %url,
                                size_bytes = bytes.len(),
                                duration_ms = start.elapsed().as_millis() as u64,
                                "Downloaded source asset"
                            );
                            return Some((bytes.to_vec(), mime));
                        }
                        Ok(_) => "empty body".to_string(),
                        Err(e) => e.to_string(),
                    }
                }
                Ok(response) => format!("HTTP {}", response.status()),
                Err(e) => e.to_string(),
            };

            tracing::warn!(
                url = %url,
                attempt = attempt + 1,
                max_attempts = self.retry.attempts,
                error = %failure,
                "Source download attempt failed"
            );

            if attempt + 1 < self.retry.attempts {
                tokio::time::sleep(self.retry.delay_after(attempt)).await;
            }
        }

        None
    }

    async fn upload(
        &self,
        source_ref: String,
        bytes: Vec<u8>,
        mime: &str,
        resource_id: Option<&str>,
    ) -> GenflowResult<StagedAsset> {
        let key = staging_key(resource_id, extension_for_mime(mime), Utc::now());
        let byte_size = bytes.len() as u64;

        let durable_url = self
            .storage
            .upload_bytes(&key, bytes, mime)
            .await
            .map_err(|e| GenflowError::Staging(e.to_string()))?;

        tracing::info!(
            storage_key = %key,
            size_bytes = byte_size,
            content_type = %mime,
            "Staged input asset"
        );

        Ok(StagedAsset {
            source_ref,
            durable_url,
            verified: true,
            byte_size: Some(byte_size),
        })
    }

    async fn probe(&self, url: &str) {
        match self.client.head(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(url = %url, "Staged URL is reachable");
            }
            Ok(response) => {
                tracing::warn!(url = %url, status = %response.status(), "Staged URL probe returned non-success");
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Staged URL probe failed");
            }
        }
    }
}

/// Split `data:<mime>;base64,<payload>` into its MIME type and decoded bytes
pub fn decode_data_uri(data_uri: &str) -> GenflowResult<(String, Vec<u8>)> {
    let rest = data_uri
        .strip_prefix("data:")
        .ok_or_else(|| GenflowError::Input("data URI must start with 'data:'".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| GenflowError::Input("data URI has no payload".to_string()))?;

    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim();
    if !parts.any(|p| p.trim() == "base64") {
        return Err(GenflowError::Input(
            "only base64 data URIs are supported".to_string(),
        ));
    }

    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| GenflowError::Input(format!("invalid base64 payload: {}", e)))?;
    if bytes.is_empty() {
        return Err(GenflowError::Input("data URI payload is empty".to_string()));
    }

    let mime = if mime.is_empty() {
        "application/octet-stream"
    } else {
        mime
    };
    Ok((mime.to_string(), bytes))
}

fn mime_from_path(path: &str) -> &'static str {
    let extension = path
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
