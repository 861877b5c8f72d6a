//! Doubao Seedance 1.0 Pro image-to-video
//!
//! Submitted through the 302.ai gateway. The gateway has exposed task status under
//! more than one path, and the same task can also be read from the Ark API directly,
//! so polling walks an ordered endpoint list.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::time::Duration;

use genflow_core::models::MediaKind;
use genflow_core::{GenflowError, GenflowResult};

use super::require_key;
use crate::adapter::{AdapterInfo, AuthScheme, PollResult, ProviderAdapter, SubmitInput, SubmitResult};
use crate::http::{build_client, error_message, first_str, send_json};
use crate::params::{bool_param, int_param, str_param, ParamRule, ParamSpec};
use crate::status::StatusVocabulary;
use crate::strategy::poll_in_order;

pub const NAME: &str = "doubao-seedance-1.0-pro";
const API_MODEL: &str = "doubao-seedance-1-0-pro-250528";
const KEY_VAR: &str = "AI302_API_KEY";
const NO_CAPACITY: &str = "No available models";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Gateway,
    GatewayLegacy,
    Ark,
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Endpoint::Gateway => write!(f, "302ai-seedance"),
            Endpoint::GatewayLegacy => write!(f, "302ai-task"),
            Endpoint::Ark => write!(f, "ark"),
        }
    }
}

pub struct DoubaoSeedanceAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    ark_base_url: String,
    ark_api_key: Option<String>,
    params: ParamSpec,
    vocabulary: StatusVocabulary,
}

impl Debug for DoubaoSeedanceAdapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DoubaoSeedanceAdapter")
            .field("base_url", &self.base_url)
            .field("ark_base_url", &self.ark_base_url)
            .field("ark_enabled", &self.ark_api_key.is_some())
            .finish()
    }
}

impl DoubaoSeedanceAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        ark_base_url: impl Into<String>,
        ark_api_key: Option<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(60), "Doubao Seedance")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            ark_base_url: ark_base_url.into().trim_end_matches('/').to_string(),
            ark_api_key,
            params: ParamSpec::new()
                .allow("resolution", ParamRule::OneOf(&["480p", "720p", "1080p"]))
                .allow(
                    "ratio",
                    ParamRule::OneOf(&["16:9", "4:3", "1:1", "3:4", "9:16", "21:9", "adaptive"]),
                )
                .allow("duration", ParamRule::IntRange { min: 2, max: 12 })
                .allow("generate_audio", ParamRule::Bool)
                .allow("seed", ParamRule::IntRange { min: -1, max: i64::from(u32::MAX) }),
            vocabulary: StatusVocabulary::default().with_failed(&["cancelled", "expired"]),
        })
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = vec![Endpoint::Gateway, Endpoint::GatewayLegacy];
        if self.ark_api_key.is_some() {
            endpoints.push(Endpoint::Ark);
        }
        endpoints
    }

    async fn poll_endpoint(&self, endpoint: Endpoint, task_id: &str) -> GenflowResult<PollResult> {
        let request = match endpoint {
            Endpoint::Gateway => self
                .client
                .get(format!("{}/doubao/doubao-seedance/{}", self.base_url, task_id))
                .bearer_auth(require_key(&self.api_key, KEY_VAR)?),
            Endpoint::GatewayLegacy => self
                .client
                .get(format!("{}/doubao/task/{}", self.base_url, task_id))
                .bearer_auth(require_key(&self.api_key, KEY_VAR)?),
            Endpoint::Ark => self
                .client
                .get(format!(
                    "{}/api/v3/contents/generations/tasks/{}",
                    self.ark_base_url, task_id
                ))
                .bearer_auth(require_key(&self.ark_api_key, "ARK_API_KEY")?),
        };

        match send_json(NAME, request).await {
            Ok(body) => parse_task(&body),
            Err(GenflowError::Provider { message, .. }) if message.contains(NO_CAPACITY) => {
                Ok(PollResult::new("running").with_progress(Some(10)))
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_task(body: &Value) -> GenflowResult<PollResult> {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        if message.contains(NO_CAPACITY) {
            return Ok(PollResult::new("running").with_progress(Some(10)));
        }
    }

    let status = first_str(body, &["/status", "/data/status"]).ok_or_else(|| {
        GenflowError::malformed(NAME, "task response has no status field")
    })?;
    let url = first_str(
        body,
        &[
            "/content/video_url",
            "/content/videoUrl",
            "/video_url",
            "/videoUrl",
            "/output/video_url",
        ],
    );
    let progress = body
        .get("progress")
        .and_then(Value::as_u64)
        .map(|p| p.min(100) as u8);

    Ok(PollResult::new(status)
        .with_progress(progress)
        .with_result_url(url)
        .with_error(error_message(body)))
}

#[async_trait]
impl ProviderAdapter for DoubaoSeedanceAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: NAME.to_string(),
            description: "Doubao Seedance 1.0 Pro image-to-video (302.ai, Ark status fallback)"
                .to_string(),
            auth_scheme: AuthScheme::Bearer,
            media_kind: MediaKind::Video,
            requires_source: true,
            synchronous: false,
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
        let image_url = input
            .source_url()
            .ok_or_else(|| GenflowError::validation(NAME, "a source image is required"))?;

        let resolution = str_param(input.params, "resolution").unwrap_or("720p");
        let ratio = str_param(input.params, "ratio").unwrap_or("adaptive");
        let duration = int_param(input.params, "duration").unwrap_or(5);

        let mut image = json!({
            "type": "image_url",
            "image_url": { "url": image_url },
        });
        let mut content = Vec::with_capacity(2);
        let prompt = input.prompt.trim();
        if prompt.is_empty() {
            image["resolution"] = json!(resolution);
            image["ratio"] = json!(ratio);
            image["duration"] = json!(duration);
        } else {
            content.push(json!({
                "type": "text",
                "text": prompt_with_flags(prompt, ratio, duration),
                "resolution": resolution,
                "ratio": ratio,
                "duration": duration,
            }));
        }
        content.push(image);

        let mut body = json!({
            "model": API_MODEL,
            "content": content,
            "service_tier": "default",
            "generate_audio": bool_param(input.params, "generate_audio").unwrap_or(true),
        });
        if let Some(seed) = int_param(input.params, "seed") {
            body["seed"] = json!(seed);
        }

        let response = send_json(
            NAME,
            self.client
                .post(format!("{}/doubao/doubao-seedance", self.base_url))
                .bearer_auth(api_key)
                .json(&body),
        )
        .await?;

        let task_id = first_str(&response, &["/id", "/task_id"])
            .ok_or_else(|| GenflowError::provider(NAME, "response is missing id"))?;

        tracing::info!(task_id = %task_id, "Seedance task submitted");
        Ok(SubmitResult::accepted(task_id))
    }

    async fn poll(&self, provider_task_id: &str) -> GenflowResult<PollResult> {
        poll_in_order(NAME, &self.endpoints(), |endpoint| {
            self.poll_endpoint(endpoint, provider_task_id)
        })
        .await
    }
}

/// Append `--ratio` and `--dur` flags unless the prompt already carries them
fn prompt_with_flags(prompt: &str, ratio: &str, duration: i64) -> String {
    let mut text = prompt.to_string();
    if ratio != "adaptive" && !text.contains("--ratio") {
        text.push_str(&format!(" --ratio {}", ratio));
    }
    if !text.contains("--dur") {
        text.push_str(&format!(" --dur {}", duration));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::normalize;
    use genflow_core::models::{CanonicalStatus, Parameters, StagedAsset};
    use mockito::Matcher;

    fn adapter(server: &mockito::Server, ark: bool) -> DoubaoSeedanceAdapter {
        DoubaoSeedanceAdapter::new(
            server.url(),
            Some("gw-key".to_string()),
            server.url(),
            ark.then(|| "ark-key".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn prompt_flags_are_appended_once() {
        assert_eq!(prompt_with_flags("a cat", "16:9", 5), "a cat --ratio 16:9 --dur 5");
        assert_eq!(prompt_with_flags("a cat", "adaptive", 8), "a cat --dur 8");
        assert_eq!(
            prompt_with_flags("a cat --ratio 1:1 --dur 3", "16:9", 5),
            "a cat --ratio 1:1 --dur 3"
        );
    }

    #[tokio::test]
    async fn submit_builds_content_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/doubao/doubao-seedance")
            .match_header("authorization", "Bearer gw-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "doubao-seedance-1-0-pro-250528",
                "content": [
                    { "type": "text", "text": "waves crashing --ratio 16:9 --dur 5" },
                    { "type": "image_url", "image_url": { "url": "https://cdn.example.com/sea.png" } }
                ],
                "generate_audio": false
            })))
            .with_status(200)
            .with_body(r#"{"id":"cgt-2025-abc"}"#)
            .create_async()
            .await;

        let staged = StagedAsset::passthrough("https://cdn.example.com/sea.png");
        let params: Parameters = json!({"ratio": "16:9", "generate_audio": false})
            .as_object()
            .cloned()
            .unwrap();

        let result = adapter(&server, false)
            .submit(SubmitInput {
                prompt: "waves crashing",
                source: Some(&staged),
                params: &params,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.provider_task_id, "cgt-2025-abc");
    }

    #[tokio::test]
    async fn falls_through_to_ark_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let primary = server
            .mock("GET", "/doubao/doubao-seedance/cgt-1")
            .with_status(404)
            .with_body(r#"{"error":{"message":"task not found"}}"#)
            .expect(1)
            .create_async()
            .await;
        let legacy = server
            .mock("GET", "/doubao/task/cgt-1")
            .with_status(200)
            .with_body(r#"{"unexpected":"shape"}"#)
            .expect(1)
            .create_async()
            .await;
        let ark = server
            .mock("GET", "/api/v3/contents/generations/tasks/cgt-1")
            .match_header("authorization", "Bearer ark-key")
            .with_status(200)
            .with_body(r#"{"id":"cgt-1","status":"succeeded","content":{"video_url":"https://ark.example.com/v.mp4"}}"#)
            .expect(1)
            .create_async()
            .await;

        let adapter = adapter(&server, true);
        let poll = adapter.poll("cgt-1").await.unwrap();

        primary.assert_async().await;
        legacy.assert_async().await;
        ark.assert_async().await;
        let observation = normalize(adapter.vocabulary(), &poll, Duration::ZERO, Duration::from_secs(90));
        assert_eq!(observation.status, CanonicalStatus::Completed);
        assert_eq!(observation.result_url.as_deref(), Some("https://ark.example.com/v.mp4"));
    }

    #[tokio::test]
    async fn no_capacity_is_still_processing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/doubao/doubao-seedance/cgt-2")
            .with_status(400)
            .with_body(r#"{"message":"No available models for doubao-seedance"}"#)
            .create_async()
            .await;

        let poll = adapter(&server, false).poll("cgt-2").await.unwrap();
        assert_eq!(poll.raw_status, "running");
        assert_eq!(poll.progress, Some(10));
    }

    #[tokio::test]
    async fn unusable_answers_soften_to_processing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/doubao/doubao-seedance/cgt-3")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/doubao/task/cgt-3")
            .with_status(404)
            .create_async()
            .await;

        let adapter = adapter(&server, false);
        let poll = adapter.poll("cgt-3").await.unwrap();
        assert_eq!(
            adapter.vocabulary().classify(&poll),
            CanonicalStatus::Processing
        );
    }
}
