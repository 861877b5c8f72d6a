//! Kling O1 image-to-video through the 302.ai gateway
//!
//! Submit: `POST /klingai/m2v_omni_video`, answered with `{status: 200, result: 1, data: {task: {id}}}`.
//! Poll: `GET /klingai/query?task_id=`. The omni task status is numeric:
//! 10 = processing, 50 = failed, 99 = completed (URL in `data.works[0]`). Tasks routed to
//! the classic Kling backend answer with `task_status` words and `task_result.videos`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use genflow_core::models::MediaKind;
use genflow_core::{GenflowError, GenflowResult};

use super::require_key;
use crate::adapter::{AdapterInfo, AuthScheme, PollResult, ProviderAdapter, SubmitInput, SubmitResult};
use crate::http::{build_client, error_message, first_str, send_json};
use crate::params::{int_param, str_param, ParamRule, ParamSpec};
use crate::status::StatusVocabulary;
use crate::strategy::{parse_first, EnvelopeParser};

pub const NAME: &str = "kling-o1";
const KEY_VAR: &str = "AI302_API_KEY";
const DEFAULT_DURATION: i64 = 5;

const ENVELOPES: &[(&str, EnvelopeParser)] = &[("omni", omni_task), ("classic", classic_task)];

pub struct KlingAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    params: ParamSpec,
    vocabulary: StatusVocabulary,
}

impl Debug for KlingAdapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("KlingAdapter")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl KlingAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(60), "Kling")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            params: ParamSpec::new()
                .allow("duration", ParamRule::IntRange { min: 5, max: 10 })
                .allow(
                    "aspect_ratio",
                    ParamRule::OneOf(&["auto", "16:9", "9:16", "1:1"]),
                ),
            vocabulary: StatusVocabulary::default()
                .with_completed(&["99", "succeed"])
                .with_failed(&["50"]),
        })
    }

    /// Envelope check shared by submit and poll: `status == 200 && result == 1`
    fn check_envelope(&self, body: &Value) -> GenflowResult<()> {
        let status = body.get("status").and_then(Value::as_i64);
        let result = body.get("result").and_then(Value::as_i64);
        if status == Some(200) && result == Some(1) {
            Ok(())
        } else {
            Err(GenflowError::provider(
                NAME,
                error_message(body).unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// `works[0]` is either a URL string or an object carrying one
fn work_url(work: &Value) -> Option<String> {
    if let Some(url) = work.as_str() {
        return Some(url.to_string());
    }
    ["/resource/resource", "/resource/url", "/url", "/video_url"]
        .iter()
        .filter_map(|pointer| work.pointer(pointer))
        .filter_map(Value::as_str)
        .find(|url| !url.is_empty())
        .map(str::to_string)
}

fn omni_task(body: &Value) -> Option<PollResult> {
    let raw_status = match body.pointer("/data/task/status")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let error = body
        .pointer("/data/task/task_status_msg")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(
        PollResult::new(raw_status)
            .with_result_url(body.pointer("/data/works/0").and_then(work_url))
            .with_error(error),
    )
}

fn classic_task(body: &Value) -> Option<PollResult> {
    let raw_status = body.pointer("/data/task_status")?.as_str()?;
    Some(
        PollResult::new(raw_status)
            .with_result_url(first_str(body, &["/data/task_result/videos/0/url"]))
            .with_error(first_str(body, &["/data/task_status_msg"])),
    )
}

#[async_trait]
impl ProviderAdapter for KlingAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: NAME.to_string(),
            description: "Kling O1 omni video (302.ai)".to_string(),
            auth_scheme: AuthScheme::Bearer,
            media_kind: MediaKind::Video,
            requires_source: false,
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
        let images: Vec<&str> = input.source_url().into_iter().collect();

        let body = json!({
            "prompt": input.prompt,
            "duration": int_param(input.params, "duration").unwrap_or(DEFAULT_DURATION),
            "aspect_ratio": str_param(input.params, "aspect_ratio").unwrap_or("auto"),
            "o1_type": "referImage",
            "images": images,
            "videos": [],
        });

        let response = send_json(
            NAME,
            self.client
                .post(format!("{}/klingai/m2v_omni_video", self.base_url))
                .bearer_auth(api_key)
                .json(&body),
        )
        .await?;
        self.check_envelope(&response)?;

        let task_id = response
            .pointer("/data/task/id")
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| GenflowError::provider(NAME, "response is missing data.task.id"))?;

        tracing::info!(task_id = %task_id, "Kling task submitted");
        Ok(SubmitResult::accepted(task_id))
    }

    async fn poll(&self, provider_task_id: &str) -> GenflowResult<PollResult> {
        let api_key = require_key(&self.api_key, KEY_VAR)?;
        let response = send_json(
            NAME,
            self.client
                .get(format!("{}/klingai/query", self.base_url))
                .query(&[("task_id", provider_task_id)])
                .bearer_auth(api_key),
        )
        .await?;
        self.check_envelope(&response)?;

        parse_first(NAME, &response, ENVELOPES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::normalize;
    use genflow_core::models::{CanonicalStatus, Parameters, StagedAsset};
    use mockito::Matcher;

    fn adapter(server: &mockito::Server) -> KlingAdapter {
        KlingAdapter::new(server.url(), Some("test-key".to_string())).unwrap()
    }

    #[tokio::test]
    async fn submit_sends_images_and_reads_task_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/klingai/m2v_omni_video")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({
                "prompt": "a fox running",
                "duration": 10,
                "aspect_ratio": "auto",
                "images": ["https://cdn.example.com/fox.png"]
            })))
            .with_status(200)
            .with_body(r#"{"status":200,"result":1,"data":{"task":{"id":"kl-123","status":10}}}"#)
            .create_async()
            .await;

        let staged = StagedAsset::passthrough("https://cdn.example.com/fox.png");
        let mut params = Parameters::new();
        params.insert("duration".to_string(), json!(10));

        let result = adapter(&server)
            .submit(SubmitInput {
                prompt: "a fox running",
                source: Some(&staged),
                params: &params,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result, SubmitResult::accepted("kl-123"));
    }

    #[tokio::test]
    async fn envelope_rejection_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/klingai/m2v_omni_video")
            .with_status(200)
            .with_body(r#"{"status":400,"result":0,"message":"image resolution too small"}"#)
            .create_async()
            .await;

        let params = Parameters::new();
        let err = adapter(&server)
            .submit(SubmitInput {
                prompt: "x",
                source: None,
                params: &params,
            })
            .await
            .unwrap_err();
        assert_eq!(err.provider_message(), Some("image resolution too small"));
    }

    #[tokio::test]
    async fn numeric_statuses_normalize() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/klingai/query")
            .match_query(Matcher::UrlEncoded("task_id".into(), "kl-1".into()))
            .with_status(200)
            .with_body(r#"{"status":200,"result":1,"data":{"task":{"id":"kl-1","status":99},"works":[{"resource":{"resource":"https://v.kling.ai/out.mp4"}}]}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/klingai/query")
            .match_query(Matcher::UrlEncoded("task_id".into(), "kl-2".into()))
            .with_status(200)
            .with_body(r#"{"status":200,"result":1,"data":{"task":{"id":"kl-2","status":50,"task_status_msg":"risk control"}}}"#)
            .create_async()
            .await;

        let adapter = adapter(&server);
        let done = adapter.poll("kl-1").await.unwrap();
        assert_eq!(done.raw_status, "99");
        let observation = normalize(adapter.vocabulary(), &done, Duration::ZERO, Duration::from_secs(60));
        assert_eq!(observation.status, CanonicalStatus::Completed);
        assert_eq!(observation.result_url.as_deref(), Some("https://v.kling.ai/out.mp4"));

        let failed = adapter.poll("kl-2").await.unwrap();
        let observation = normalize(adapter.vocabulary(), &failed, Duration::ZERO, Duration::from_secs(60));
        assert_eq!(observation.status, CanonicalStatus::Failed);
        assert_eq!(observation.error.as_deref(), Some("risk control"));
    }

    #[test]
    fn rejects_out_of_range_duration() {
        let adapter = KlingAdapter::new("http://localhost", None).unwrap();
        let mut params = Parameters::new();
        params.insert("duration".to_string(), json!(12));
        assert!(adapter.validate_params(&params).is_err());
    }

    #[tokio::test]
    async fn missing_key_is_config_error() {
        let adapter = KlingAdapter::new("http://localhost", None).unwrap();
        assert!(matches!(
            adapter.poll("kl-1").await,
            Err(GenflowError::Config(_))
        ));
    }

    #[tokio::test]
    async fn classic_task_body_is_read_after_omni() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/klingai/query")
            .match_query(Matcher::UrlEncoded("task_id".into(), "kl-classic".into()))
            .with_status(200)
            .with_body(r#"{"status":200,"result":1,"data":{"task_id":"kl-classic","task_status":"succeed","task_result":{"videos":[{"id":"v1","url":"https://v.kling.ai/classic.mp4"}]}}}"#)
            .create_async()
            .await;

        let adapter = adapter(&server);
        let done = adapter.poll("kl-classic").await.unwrap();
        assert_eq!(done.raw_status, "succeed");
        let observation = normalize(adapter.vocabulary(), &done, Duration::ZERO, Duration::from_secs(60));
        assert_eq!(observation.status, CanonicalStatus::Completed);
        assert_eq!(observation.result_url.as_deref(), Some("https://v.kling.ai/classic.mp4"));
    }

    #[tokio::test]
    async fn query_rejection_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/klingai/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":400,"result":0,"message":"task not found"}"#)
            .create_async()
            .await;

        let err = adapter(&server).poll("kl-gone").await.unwrap_err();
        assert_eq!(err.provider_message(), Some("task not found"));
    }
}
