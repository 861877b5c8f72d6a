//! Concrete provider adapters

#[cfg(feature = "adapter-dashscope-wan")]
pub mod dashscope_wan;
#[cfg(feature = "adapter-doubao-seedance")]
pub mod doubao_seedance;
#[cfg(feature = "adapter-hailuo")]
pub mod hailuo;
#[cfg(feature = "adapter-kling")]
pub mod kling;
#[cfg(feature = "adapter-seedream")]
pub mod seedream;
#[cfg(feature = "adapter-volcengine")]
pub mod volcengine;

#[cfg(feature = "adapter-dashscope-wan")]
pub use dashscope_wan::DashscopeWanAdapter;
#[cfg(feature = "adapter-doubao-seedance")]
pub use doubao_seedance::DoubaoSeedanceAdapter;
#[cfg(feature = "adapter-hailuo")]
pub use hailuo::HailuoAdapter;
#[cfg(feature = "adapter-kling")]
pub use kling::KlingAdapter;
#[cfg(feature = "adapter-seedream")]
pub use seedream::SeedreamAdapter;
#[cfg(feature = "adapter-volcengine")]
pub use volcengine::VolcengineAdapter;

use std::sync::Arc;

use genflow_core::{Config, GenflowError, GenflowResult};

use crate::registry::AdapterRegistry;

/// Credential lookup; a missing key surfaces on first use, not at startup
pub(crate) fn require_key<'a>(key: &'a Option<String>, var: &str) -> GenflowResult<&'a str> {
    key.as_deref()
        .ok_or_else(|| GenflowError::Config(format!("{} not configured", var)))
}

/// Registry with every compiled-in adapter, configured from `config`
pub async fn build_registry(config: &Config) -> anyhow::Result<AdapterRegistry> {
    let registry = AdapterRegistry::new();
    #[allow(unused_variables)]
    let providers = &config.providers;

    #[cfg(feature = "adapter-volcengine")]
    {
        let signer = match (
            &providers.volcengine_access_key,
            &providers.volcengine_secret_key,
        ) {
            (Some(access_key), Some(secret_key)) => Some(crate::signing::SigningContext::new(
                access_key.clone(),
                secret_key.clone(),
                providers.volcengine_region.clone(),
                providers.volcengine_service.clone(),
            )),
            _ => None,
        };
        registry
            .register(Arc::new(VolcengineAdapter::new(
                providers.volcengine_base_url.clone(),
                signer,
            )?))
            .await;
    }

    #[cfg(feature = "adapter-doubao-seedance")]
    registry
        .register(Arc::new(DoubaoSeedanceAdapter::new(
            providers.ai302_base_url.clone(),
            providers.ai302_api_key.clone(),
            providers.ark_base_url.clone(),
            providers.ark_api_key.clone(),
        )?))
        .await;

    #[cfg(feature = "adapter-dashscope-wan")]
    registry
        .register(Arc::new(DashscopeWanAdapter::new(
            providers.dashscope_base_url.clone(),
            providers.dashscope_api_key.clone(),
        )?))
        .await;

    #[cfg(feature = "adapter-hailuo")]
    registry
        .register(Arc::new(HailuoAdapter::new(
            providers.ai302_base_url.clone(),
            providers.ai302_api_key.clone(),
        )?))
        .await;

    #[cfg(feature = "adapter-kling")]
    registry
        .register(Arc::new(KlingAdapter::new(
            providers.ai302_base_url.clone(),
            providers.ai302_api_key.clone(),
        )?))
        .await;

    #[cfg(feature = "adapter-seedream")]
    registry
        .register(Arc::new(SeedreamAdapter::new(
            providers.ai302_base_url.clone(),
            providers.ai302_api_key.clone(),
        )?))
        .await;

    tracing::info!(
        adapters = registry.list().await.len(),
        "Provider adapters registered"
    );
    Ok(registry)
}

#[cfg(all(test, feature = "all-adapters"))]
mod tests {
    use super::*;
    use genflow_core::config::{PollingSettings, ProviderCredentials, StorageConfig};

    fn config() -> Config {
        Config {
            storage: StorageConfig::default(),
            providers: ProviderCredentials {
                volcengine_region: "cn-north-1".to_string(),
                volcengine_service: "cv".to_string(),
                volcengine_base_url: "https://visual.volcengineapi.com".to_string(),
                ark_base_url: "https://ark.cn-beijing.volces.com".to_string(),
                dashscope_base_url: "https://dashscope.aliyuncs.com".to_string(),
                ai302_base_url: "https://api.302.ai".to_string(),
                ..Default::default()
            },
            polling: PollingSettings::default(),
            fallbacks: Vec::new(),
            resource_lock_cooldown_secs: 10,
            finished_job_retention_secs: 3600,
            log_format: "text".to_string(),
        }
    }

    #[tokio::test]
    async fn registers_every_adapter() {
        let registry = build_registry(&config()).await.unwrap();
        let names: Vec<String> = registry.list().await.into_iter().map(|i| i.name).collect();
        assert_eq!(
            names,
            vec![
                "doubao-seedance-1.0-pro",
                "kling-o1",
                "minimax-hailuo-02",
                "seedream-4.5",
                "volcengine-video-3.0-pro",
                "wan2.2-i2v-flash",
            ]
        );
    }

    #[test]
    fn missing_key_names_the_variable() {
        let err = require_key(&None, "AI302_API_KEY").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: AI302_API_KEY not configured");
    }
}
