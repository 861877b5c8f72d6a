//! Configuration module
//!
//! Loads staging storage, provider credentials, polling budgets and fallback pairs from
//! the environment (with `.env` support). Credentials are read once at startup and are
//! immutable afterwards.

use serde::Deserialize;
use std::env;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use crate::models::MediaKind;

const VOLCENGINE_VISUAL_HOST: &str = "https://visual.volcengineapi.com";
const VOLCENGINE_REGION: &str = "cn-north-1";
const VOLCENGINE_SERVICE: &str = "cv";
const ARK_BASE_URL: &str = "https://ark.cn-beijing.volces.com";
const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com";
const AI302_BASE_URL: &str = "https://api.302.ai";
const RESOURCE_LOCK_COOLDOWN_SECS: u64 = 10;
const FINISHED_JOB_RETENTION_SECS: u64 = 3600;

/// Consecutive transport failures tolerated while polling one job
pub const DEFAULT_MAX_CONSECUTIVE_TRANSPORT_ERRORS: u32 = 5;

/// Where staged input assets are written (`STORAGE_BACKEND`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(StorageBackend::Local),
            "s3" => Ok(StorageBackend::S3),
            other => Err(anyhow::anyhow!(
                "Unknown STORAGE_BACKEND '{}' (expected local or s3)",
                other
            )),
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            StorageBackend::Local => "local",
            StorageBackend::S3 => "s3",
        })
    }
}

/// Staging storage configuration
#[derive(Clone, Debug, Default)]
pub struct StorageConfig {
    pub backend: Option<StorageBackend>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    /// CDN domain that replaces the backend's own host in returned URLs
    pub public_base_url: Option<String>,
}

/// Provider credentials and endpoints
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    pub volcengine_access_key: Option<String>,
    pub volcengine_secret_key: Option<String>,
    pub volcengine_region: String,
    pub volcengine_service: String,
    pub volcengine_base_url: String,
    pub ark_api_key: Option<String>,
    pub ark_base_url: String,
    pub dashscope_api_key: Option<String>,
    pub dashscope_base_url: String,
    pub ai302_api_key: Option<String>,
    pub ai302_base_url: String,
}

// Secrets are reported as present/absent only.
impl Debug for ProviderCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ProviderCredentials")
            .field("volcengine_access_key", &self.volcengine_access_key.is_some())
            .field("volcengine_secret_key", &self.volcengine_secret_key.is_some())
            .field("volcengine_region", &self.volcengine_region)
            .field("volcengine_service", &self.volcengine_service)
            .field("volcengine_base_url", &self.volcengine_base_url)
            .field("ark_api_key", &self.ark_api_key.is_some())
            .field("ark_base_url", &self.ark_base_url)
            .field("dashscope_api_key", &self.dashscope_api_key.is_some())
            .field("dashscope_base_url", &self.dashscope_base_url)
            .field("ai302_api_key", &self.ai302_api_key.is_some())
            .field("ai302_base_url", &self.ai302_base_url)
            .finish()
    }
}

/// Polling budgets, read from `IMAGE_POLL_*`, `VIDEO_POLL_*` and
/// `MAX_CONSECUTIVE_TRANSPORT_ERRORS`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PollingSettings {
    #[serde(default = "default_image_poll_interval_secs")]
    pub image_poll_interval_secs: u64,
    #[serde(default = "default_image_poll_timeout_secs")]
    pub image_poll_timeout_secs: u64,
    #[serde(default = "default_video_poll_interval_secs")]
    pub video_poll_interval_secs: u64,
    #[serde(default = "default_video_poll_timeout_secs")]
    pub video_poll_timeout_secs: u64,
    #[serde(default = "default_max_consecutive_transport_errors")]
    pub max_consecutive_transport_errors: u32,
}

fn default_image_poll_interval_secs() -> u64 {
    5
}

fn default_image_poll_timeout_secs() -> u64 {
    300
}

fn default_video_poll_interval_secs() -> u64 {
    10
}

fn default_video_poll_timeout_secs() -> u64 {
    1800
}

fn default_max_consecutive_transport_errors() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_TRANSPORT_ERRORS
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            image_poll_interval_secs: default_image_poll_interval_secs(),
            image_poll_timeout_secs: default_image_poll_timeout_secs(),
            video_poll_interval_secs: default_video_poll_interval_secs(),
            video_poll_timeout_secs: default_video_poll_timeout_secs(),
            max_consecutive_transport_errors: default_max_consecutive_transport_errors(),
        }
    }
}

impl PollingSettings {
    /// (interval, timeout) for a media kind
    pub fn budget_for(&self, kind: MediaKind) -> (Duration, Duration) {
        match kind {
            MediaKind::Image => (
                Duration::from_secs(self.image_poll_interval_secs),
                Duration::from_secs(self.image_poll_timeout_secs),
            ),
            MediaKind::Video => (
                Duration::from_secs(self.video_poll_interval_secs),
                Duration::from_secs(self.video_poll_timeout_secs),
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub storage: StorageConfig,
    pub providers: ProviderCredentials,
    pub polling: PollingSettings,
    /// (primary, secondary) provider pairs
    pub fallbacks: Vec<(String, String)>,
    pub resource_lock_cooldown_secs: u64,
    /// How long a finished job stays queryable
    pub finished_job_retention_secs: u64,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => Some(value.parse::<StorageBackend>()?),
            Err(_) => None,
        };

        let storage = StorageConfig {
            backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            public_base_url: env::var("STORAGE_PUBLIC_BASE_URL").ok(),
        };

        let providers = ProviderCredentials {
            volcengine_access_key: non_empty_var("VOLCENGINE_ACCESS_KEY"),
            volcengine_secret_key: non_empty_var("VOLCENGINE_SECRET_KEY"),
            volcengine_region: env::var("VOLCENGINE_REGION")
                .unwrap_or_else(|_| VOLCENGINE_REGION.to_string()),
            volcengine_service: env::var("VOLCENGINE_SERVICE")
                .unwrap_or_else(|_| VOLCENGINE_SERVICE.to_string()),
            volcengine_base_url: env::var("VOLCENGINE_API_HOST")
                .unwrap_or_else(|_| VOLCENGINE_VISUAL_HOST.to_string()),
            ark_api_key: non_empty_var("ARK_API_KEY"),
            ark_base_url: env::var("ARK_BASE_URL").unwrap_or_else(|_| ARK_BASE_URL.to_string()),
            dashscope_api_key: non_empty_var("DASHSCOPE_API_KEY"),
            dashscope_base_url: env::var("DASHSCOPE_BASE_URL")
                .unwrap_or_else(|_| DASHSCOPE_BASE_URL.to_string()),
            ai302_api_key: non_empty_var("AI302_API_KEY"),
            ai302_base_url: env::var("AI302_BASE_URL")
                .unwrap_or_else(|_| AI302_BASE_URL.to_string()),
        };

        let polling = envy::from_env::<PollingSettings>()
            .map_err(|e| anyhow::anyhow!("Invalid polling settings: {}", e))?;

        let fallbacks = parse_fallbacks(&env::var("PROVIDER_FALLBACKS").unwrap_or_default())?;

        let config = Config {
            storage,
            providers,
            polling,
            fallbacks,
            resource_lock_cooldown_secs: secs_var(
                "RESOURCE_LOCK_COOLDOWN_SECS",
                RESOURCE_LOCK_COOLDOWN_SECS,
            )?,
            finished_job_retention_secs: secs_var(
                "FINISHED_JOB_RETENTION_SECS",
                FINISHED_JOB_RETENTION_SECS,
            )?,
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let polling = &self.polling;
        if polling.image_poll_interval_secs == 0 || polling.video_poll_interval_secs == 0 {
            anyhow::bail!("Poll intervals must be greater than zero");
        }
        if polling.image_poll_timeout_secs < polling.image_poll_interval_secs
            || polling.video_poll_timeout_secs < polling.video_poll_interval_secs
        {
            anyhow::bail!("Poll timeouts must not be shorter than poll intervals");
        }
        if polling.max_consecutive_transport_errors == 0 {
            anyhow::bail!("MAX_CONSECUTIVE_TRANSPORT_ERRORS must be at least 1");
        }

        match self.storage.backend {
            Some(StorageBackend::Local) if self.storage.local_storage_path.is_none() => {
                anyhow::bail!("LOCAL_STORAGE_PATH must be set when STORAGE_BACKEND=local")
            }
            Some(StorageBackend::S3) if self.storage.s3_bucket.is_none() => {
                anyhow::bail!("S3_BUCKET must be set when STORAGE_BACKEND=s3")
            }
            _ => {}
        }

        for (primary, secondary) in &self.fallbacks {
            if primary == secondary {
                anyhow::bail!("Provider '{}' cannot fall back to itself", primary);
            }
        }

        Ok(())
    }

    pub fn storage_backend(&self) -> Option<StorageBackend> {
        self.storage.backend
    }

    pub fn fallback_for(&self, primary: &str) -> Option<&str> {
        self.fallbacks
            .iter()
            .find(|(p, _)| p == primary)
            .map(|(_, s)| s.as_str())
    }

    pub fn resource_lock_cooldown(&self) -> Duration {
        Duration::from_secs(self.resource_lock_cooldown_secs)
    }

    pub fn finished_job_retention(&self) -> Duration {
        Duration::from_secs(self.finished_job_retention_secs)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn secs_var(name: &str, default: u64) -> anyhow::Result<u64> {
    parse_secs(name, env::var(name).ok().as_deref(), default)
}

/// Whole seconds from an environment value, `default` when unset or blank
pub fn parse_secs(name: &str, raw: Option<&str>, default: u64) -> anyhow::Result<u64> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", name, value, e)),
    }
}

/// Parse `primary=secondary` pairs separated by commas
pub fn parse_fallbacks(raw: &str) -> anyhow::Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (primary, secondary) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Invalid fallback entry '{}'", entry))?;
            let (primary, secondary) = (primary.trim(), secondary.trim());
            if primary.is_empty() || secondary.is_empty() {
                anyhow::bail!("Invalid fallback entry '{}'", entry);
            }
            Ok((primary.to_string(), secondary.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            storage: StorageConfig::default(),
            providers: ProviderCredentials::default(),
            polling: PollingSettings::default(),
            fallbacks: Vec::new(),
            resource_lock_cooldown_secs: RESOURCE_LOCK_COOLDOWN_SECS,
            finished_job_retention_secs: FINISHED_JOB_RETENTION_SECS,
            log_format: "text".to_string(),
        }
    }

    #[test]
    fn parse_fallbacks_accepts_pairs() {
        let pairs =
            parse_fallbacks("volcengine-video-3.0-pro=doubao-seedance-1.0-pro, kling-o1 = wan2.2-i2v-flash")
                .unwrap();
        assert_eq!(
            pairs,
            vec![
                (
                    "volcengine-video-3.0-pro".to_string(),
                    "doubao-seedance-1.0-pro".to_string()
                ),
                ("kling-o1".to_string(), "wan2.2-i2v-flash".to_string()),
            ]
        );
        assert!(parse_fallbacks("").unwrap().is_empty());
        assert!(parse_fallbacks("kling-o1").is_err());
        assert!(parse_fallbacks("=wan").is_err());
    }

    #[test]
    fn polling_settings_from_env_pairs() {
        let settings: PollingSettings = envy::from_iter(vec![
            ("VIDEO_POLL_INTERVAL_SECS".to_string(), "7".to_string()),
            ("MAX_CONSECUTIVE_TRANSPORT_ERRORS".to_string(), "3".to_string()),
        ])
        .unwrap();

        assert_eq!(settings.video_poll_interval_secs, 7);
        assert_eq!(settings.video_poll_timeout_secs, 1800);
        assert_eq!(settings.image_poll_interval_secs, 5);
        assert_eq!(settings.max_consecutive_transport_errors, 3);
    }

    #[test]
    fn seconds_settings_reject_garbage() {
        let name = "RESOURCE_LOCK_COOLDOWN_SECS";
        assert_eq!(parse_secs(name, None, 10).unwrap(), 10);
        assert_eq!(parse_secs(name, Some("  "), 10).unwrap(), 10);
        assert_eq!(parse_secs(name, Some("0"), 10).unwrap(), 0);
        assert_eq!(parse_secs(name, Some(" 30 "), 10).unwrap(), 30);

        let err = parse_secs(name, Some("ten"), 10).unwrap_err();
        assert!(err.to_string().contains("RESOURCE_LOCK_COOLDOWN_SECS"));
        assert!(parse_secs(name, Some("-5"), 10).is_err());
    }

    #[test]
    fn budget_depends_on_media_kind() {
        let settings = PollingSettings::default();
        assert_eq!(
            settings.budget_for(MediaKind::Image),
            (Duration::from_secs(5), Duration::from_secs(300))
        );
        assert_eq!(
            settings.budget_for(MediaKind::Video),
            (Duration::from_secs(10), Duration::from_secs(1800))
        );
    }

    #[test]
    fn validate_rejects_inconsistent_settings() {
        assert!(config().validate().is_ok());

        let mut bad = config();
        bad.polling.video_poll_timeout_secs = 1;
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.storage.backend = Some(StorageBackend::Local);
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.fallbacks = vec![("a".to_string(), "a".to_string())];
        assert!(bad.validate().is_err());
    }

    #[test]
    fn storage_backend_names() {
        assert_eq!(" S3 ".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!("fs".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!(StorageBackend::Local.to_string(), "local");
        assert!("gcs".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn fallback_lookup() {
        let mut config = config();
        config.fallbacks = vec![("a".to_string(), "b".to_string())];
        assert_eq!(config.fallback_for("a"), Some("b"));
        assert_eq!(config.fallback_for("b"), None);
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let credentials = ProviderCredentials {
            ark_api_key: Some("sk-live-123456".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("sk-live-123456"));
        assert!(rendered.contains("ark_api_key: true"));
    }
}
