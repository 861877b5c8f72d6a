//! Tongyi Wanxiang wan2.2 image-to-video on DashScope
//!
//! Asynchronous submit (`X-DashScope-Async: enable`), then `GET /api/v1/tasks/{id}`.
//! Task bodies come either wrapped in `output` or flat, depending on the API version.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use genflow_core::models::MediaKind;
use genflow_core::{GenflowError, GenflowResult};

use super::require_key;
use crate::adapter::{AdapterInfo, AuthScheme, PollResult, ProviderAdapter, SubmitInput, SubmitResult};
use crate::http::{build_client, first_str, send_json};
use crate::params::{int_param, str_param, ParamRule, ParamSpec};
use crate::status::StatusVocabulary;
use crate::strategy::{parse_first, EnvelopeParser};

pub const NAME: &str = "wan2.2-i2v-flash";
const KEY_VAR: &str = "DASHSCOPE_API_KEY";

pub struct DashscopeWanAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    params: ParamSpec,
    vocabulary: StatusVocabulary,
}

impl Debug for DashscopeWanAdapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DashscopeWanAdapter")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl DashscopeWanAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(60), "DashScope")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            params: ParamSpec::new()
                .allow("resolution", ParamRule::OneOf(&["480P", "720P", "1080P"]))
                .allow("duration", ParamRule::IntOneOf(&[5])),
            vocabulary: StatusVocabulary::default()
                .with_completed(&["SUCCEEDED"])
                .with_failed(&["FAILED", "CANCELED", "UNKNOWN"])
                .with_queued(&["PENDING"]),
        })
    }
}

const ENVELOPES: &[(&str, EnvelopeParser)] = &[("output", output_envelope), ("flat", flat_envelope)];

fn output_envelope(body: &Value) -> Option<PollResult> {
    let output = body.get("output")?;
    let status = first_str(output, &["/task_status", "/status"])?;
    let progress = output
        .get("progress")
        .and_then(Value::as_u64)
        .map(|p| p.min(100) as u8);
    Some(
        PollResult::new(status)
            .with_progress(progress)
            .with_result_url(first_str(output, &["/video_url"]))
            .with_error(first_str(body, &["/output/message", "/message"])),
    )
}

fn flat_envelope(body: &Value) -> Option<PollResult> {
    let status = first_str(body, &["/task_status", "/status"])?;
    Some(
        PollResult::new(status)
            .with_result_url(first_str(body, &["/video_url"]))
            .with_error(first_str(body, &["/message"])),
    )
}

#[async_trait]
impl ProviderAdapter for DashscopeWanAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: NAME.to_string(),
            description: "Wan 2.2 flash image-to-video (DashScope)".to_string(),
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

        let mut request_input = json!({ "image_url": image_url });
        if !input.prompt.is_empty() {
            request_input["prompt"] = json!(input.prompt);
        }
        let body = json!({
            "model": NAME,
            "input": request_input,
            "parameters": {
                "resolution": str_param(input.params, "resolution").unwrap_or("480P"),
                "duration": int_param(input.params, "duration").unwrap_or(5),
            },
        });

        let response = send_json(
            NAME,
            self.client
                .post(format!(
                    "{}/api/v1/services/aigc/video-generation/generation",
                    self.base_url
                ))
                .bearer_auth(api_key)
                .header("X-DashScope-Async", "enable")
                .json(&body),
        )
        .await?;

        let task_id = first_str(&response, &["/output/task_id", "/task_id"])
            .ok_or_else(|| GenflowError::provider(NAME, "response is missing output.task_id"))?;

        let task = parse_first(NAME, &response, ENVELOPES).ok();
        if let Some(url) = task.as_ref().and_then(|t| t.result_url.clone()) {
            return Ok(SubmitResult::completed(task_id, url));
        }

        tracing::info!(
            task_id = %task_id,
            task_status = ?task.map(|t| t.raw_status),
            "DashScope task submitted"
        );
        Ok(SubmitResult::accepted(task_id))
    }

    async fn poll(&self, provider_task_id: &str) -> GenflowResult<PollResult> {
        let api_key = require_key(&self.api_key, KEY_VAR)?;
        let response = send_json(
            NAME,
            self.client
                .get(format!("{}/api/v1/tasks/{}", self.base_url, provider_task_id))
                .bearer_auth(api_key),
        )
        .await?;

        parse_first(NAME, &response, ENVELOPES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::normalize;
    use genflow_core::models::{CanonicalStatus, Parameters, StagedAsset};
    use mockito::Matcher;

    #[tokio::test]
    async fn submit_uses_async_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/services/aigc/video-generation/generation")
            .match_header("x-dashscope-async", "enable")
            .match_header("authorization", "Bearer ds-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "wan2.2-i2v-flash",
                "input": { "image_url": "https://cdn.example.com/a.png" },
                "parameters": { "resolution": "720P", "duration": 5 }
            })))
            .with_status(200)
            .with_body(r#"{"request_id":"r1","output":{"task_id":"ds-1","task_status":"PENDING"}}"#)
            .create_async()
            .await;

        let adapter = DashscopeWanAdapter::new(server.url(), Some("ds-key".to_string())).unwrap();
        let staged = StagedAsset::passthrough("https://cdn.example.com/a.png");
        let mut params = Parameters::new();
        params.insert("resolution".to_string(), json!("720P"));

        let result = adapter
            .submit(SubmitInput {
                prompt: "",
                source: Some(&staged),
                params: &params,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result, SubmitResult::accepted("ds-1"));
    }

    #[tokio::test]
    async fn submit_without_source_fails_before_network() {
        let adapter = DashscopeWanAdapter::new("http://127.0.0.1:9", Some("k".to_string())).unwrap();
        let params = Parameters::new();
        let err = adapter
            .submit(SubmitInput {
                prompt: "x",
                source: None,
                params: &params,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GenflowError::Validation { .. }));
    }

    #[tokio::test]
    async fn poll_maps_task_states() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/tasks/ds-run")
            .with_status(200)
            .with_body(r#"{"output":{"task_id":"ds-run","task_status":"RUNNING"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/tasks/ds-done")
            .with_status(200)
            .with_body(r#"{"output":{"task_id":"ds-done","task_status":"SUCCEEDED","video_url":"https://dashscope-result.oss/v.mp4"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/tasks/ds-bad")
            .with_status(200)
            .with_body(r#"{"output":{"task_id":"ds-bad","task_status":"FAILED","code":"DataInspectionFailed","message":"Input data may contain inappropriate content."}}"#)
            .create_async()
            .await;

        let adapter = DashscopeWanAdapter::new(server.url(), Some("k".to_string())).unwrap();
        let expected = Duration::from_secs(60);

        let running = adapter.poll("ds-run").await.unwrap();
        assert_eq!(
            normalize(adapter.vocabulary(), &running, Duration::ZERO, expected).status,
            CanonicalStatus::Processing
        );

        let done = adapter.poll("ds-done").await.unwrap();
        let observation = normalize(adapter.vocabulary(), &done, Duration::ZERO, expected);
        assert_eq!(observation.status, CanonicalStatus::Completed);
        assert_eq!(observation.result_url.as_deref(), Some("https://dashscope-result.oss/v.mp4"));

        let bad = adapter.poll("ds-bad").await.unwrap();
        let observation = normalize(adapter.vocabulary(), &bad, Duration::ZERO, expected);
        assert_eq!(observation.status, CanonicalStatus::Failed);
        assert_eq!(
            observation.error.as_deref(),
            Some("Input data may contain inappropriate content.")
        );
    }

    #[tokio::test]
    async fn unauthorized_is_provider_error_with_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/tasks/x")
            .with_status(401)
            .with_body(r#"{"code":"InvalidApiKey","message":"Invalid API-key provided."}"#)
            .create_async()
            .await;

        let adapter = DashscopeWanAdapter::new(server.url(), Some("k".to_string())).unwrap();
        let err = adapter.poll("x").await.unwrap_err();
        assert_eq!(err.provider_message(), Some("Invalid API-key provided."));
    }

    #[tokio::test]
    async fn flat_task_body_is_read_after_output_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/tasks/ds-flat")
            .with_status(200)
            .with_body(r#"{"task_id":"ds-flat","status":"SUCCEEDED","video_url":"https://dashscope-result.oss/flat.mp4"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/tasks/ds-odd")
            .with_status(200)
            .with_body(r#"{"request_id":"r9"}"#)
            .create_async()
            .await;

        let adapter = DashscopeWanAdapter::new(server.url(), Some("k".to_string())).unwrap();

        let flat = adapter.poll("ds-flat").await.unwrap();
        assert_eq!(flat.raw_status, "SUCCEEDED");
        assert_eq!(flat.result_url.as_deref(), Some("https://dashscope-result.oss/flat.mp4"));

        assert!(matches!(
            adapter.poll("ds-odd").await,
            Err(GenflowError::Malformed { .. })
        ));
    }
}
