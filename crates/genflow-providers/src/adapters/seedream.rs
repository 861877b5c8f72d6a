//! Seedream 4.5 image generation (302.ai), synchronous
//!
//! The image URL comes back in the submit response, so submit returns a terminal
//! result and the job is never polled.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use genflow_core::models::MediaKind;
use genflow_core::{GenflowError, GenflowResult};

use super::require_key;
use crate::adapter::{AdapterInfo, AuthScheme, PollResult, ProviderAdapter, SubmitInput, SubmitResult};
use crate::http::{build_client, send_json};
use crate::params::{str_param, ParamRule, ParamSpec};
use crate::status::StatusVocabulary;

pub const NAME: &str = "seedream-4.5";
const API_MODEL: &str = "doubao-seedream-4-5-251128";
const KEY_VAR: &str = "AI302_API_KEY";

pub struct SeedreamAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    params: ParamSpec,
    vocabulary: StatusVocabulary,
}

impl Debug for SeedreamAdapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SeedreamAdapter")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl SeedreamAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            // Generation happens inside the request
            client: build_client(Duration::from_secs(180), "Seedream")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            params: ParamSpec::new()
                .allow("size", ParamRule::OneOf(&["2K", "4K"]))
                .allow(
                    "aspect_ratio",
                    ParamRule::OneOf(&["1:1", "4:3", "3:4", "16:9", "9:16", "3:2", "2:3", "21:9"]),
                ),
            vocabulary: StatusVocabulary::default(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for SeedreamAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: NAME.to_string(),
            description: "Seedream 4.5 text/image-to-image (302.ai)".to_string(),
            auth_scheme: AuthScheme::Bearer,
            media_kind: MediaKind::Image,
            requires_source: false,
            synchronous: true,
        }
    }

    fn param_spec(&self) -> &ParamSpec {
        &self.params
    }

    fn vocabulary(&self) -> &StatusVocabulary {
        &self.vocabulary
    }

    #[tracing::instrument(skip(self, input), fields(provider = NAME))]
    async fn submit(&self, input: SubmitInput<'_>) -> GenflowResult<SubmitResult> {
        let api_key = require_key(&self.api_key, KEY_VAR)?;
        if input.prompt.trim().is_empty() {
            return Err(GenflowError::validation(NAME, "a prompt is required"));
        }

        let mut body = json!({
            "model": API_MODEL,
            "prompt": input.prompt,
            "size": str_param(input.params, "size").unwrap_or("2K"),
            "sequential_image_generation": "disabled",
            "response_format": "url",
            "watermark": false,
            "stream": false,
        });
        if let Some(reference) = input.source_url() {
            body["image"] = json!([reference]);
        }

        let start = std::time::Instant::now();
        let response = send_json(
            NAME,
            self.client
                .post(format!("{}/doubao/images/generations", self.base_url))
                .bearer_auth(api_key)
                .json(&body),
        )
        .await?;

        let url = response
            .get("data")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|item| item.get("url").and_then(Value::as_str))
            .find(|url| !url.is_empty())
            .ok_or_else(|| GenflowError::provider(NAME, "response contains no image URL"))?;

        let task_id = format!("seedream-{}", Utc::now().timestamp_millis());
        tracing::info!(
            task_id = %task_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Seedream image generated"
        );
        Ok(SubmitResult::completed(task_id, url))
    }

    async fn poll(&self, provider_task_id: &str) -> GenflowResult<PollResult> {
        Err(GenflowError::Internal(format!(
            "{} is synchronous; task '{}' has no status endpoint",
            NAME, provider_task_id
        )))
    }
}
