//! MiniMax Hailuo 02 video through the 302.ai gateway
//!
//! Poll strategy: the query endpoint first, then the file-retrieve endpoint. A successful
//! task usually reports a `file_id` rather than a URL, and the download URL comes from
//! `/minimaxi/v1/files/retrieve`. If no strategy yields a URL the task stays in flight
//! and the next poll tries again.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::time::Duration;

use genflow_core::models::{MediaKind, Parameters};
use genflow_core::{GenflowError, GenflowResult};

use super::require_key;
use crate::adapter::{AdapterInfo, AuthScheme, PollResult, ProviderAdapter, SubmitInput, SubmitResult};
use crate::http::{first_str, send_json};
use crate::params::{bool_param, int_param, str_param, ParamRule, ParamSpec};
use crate::status::StatusVocabulary;
use crate::strategy::poll_in_order;

pub const NAME: &str = "minimax-hailuo-02";
const API_MODEL: &str = "MiniMax-Hailuo-02";
const KEY_VAR: &str = "AI302_API_KEY";
const DEFAULT_RESOLUTION: &str = "768P";
const DEFAULT_DURATION: i64 = 6;
const SUCCESS: &str = "Success";

/// Where the video URL of a finished task is read from, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlSource {
    Query,
    FileRetrieve,
}

impl Display for UrlSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UrlSource::Query => write!(f, "query"),
            UrlSource::FileRetrieve => write!(f, "files-retrieve"),
        }
    }
}

const URL_SOURCES: &[UrlSource] = &[UrlSource::Query, UrlSource::FileRetrieve];

pub struct HailuoAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    params: ParamSpec,
    vocabulary: StatusVocabulary,
}

impl Debug for HailuoAdapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HailuoAdapter")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HailuoAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: crate::http::build_client(Duration::from_secs(60), "MiniMax Hailuo")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            params: ParamSpec::new()
                .allow("resolution", ParamRule::OneOf(&["512P", "768P", "1080P"]))
                .allow("duration", ParamRule::IntOneOf(&[6, 10]))
                .allow("prompt_optimizer", ParamRule::Bool),
            vocabulary: StatusVocabulary::default()
                .with_completed(&["Success"])
                .with_failed(&["Fail", "Failed"])
                .with_queued(&["Queueing", "Preparing"]),
        })
    }

    /// `base_resp.status_code` other than 0 is a provider-side rejection
    fn check_base_resp(body: &Value) -> GenflowResult<()> {
        match body.pointer("/base_resp/status_code").and_then(Value::as_i64) {
            Some(0) | None => Ok(()),
            Some(code) => Err(GenflowError::provider(
                NAME,
                body.pointer("/base_resp/status_msg")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("status code {}", code)),
            )),
        }
    }

    async fn download_url(&self, api_key: &str, file_id: &str) -> GenflowResult<String> {
        let response = send_json(
            NAME,
            self.client
                .get(format!("{}/minimaxi/v1/files/retrieve", self.base_url))
                .query(&[("file_id", file_id)])
                .bearer_auth(api_key),
        )
        .await?;
        Self::check_base_resp(&response)?;

        first_str(&response, &["/file/download_url"])
            .ok_or_else(|| GenflowError::provider(NAME, "file lookup is missing file.download_url"))
    }
}

#[async_trait]
impl ProviderAdapter for HailuoAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: NAME.to_string(),
            description: "MiniMax Hailuo 02 image-to-video (302.ai)".to_string(),
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

    fn validate_params(&self, params: &Parameters) -> GenflowResult<()> {
        self.params.validate(NAME, params)?;

        let resolution = str_param(params, "resolution").unwrap_or(DEFAULT_RESOLUTION);
        let duration = int_param(params, "duration").unwrap_or(DEFAULT_DURATION);
        if resolution == "1080P" && duration != 6 {
            return Err(GenflowError::validation(
                NAME,
                format!("resolution 1080P supports only 6s, got {}s", duration),
            ));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, input), fields(provider = NAME))]
    async fn submit(&self, input: SubmitInput<'_>) -> GenflowResult<SubmitResult> {
        let api_key = require_key(&self.api_key, KEY_VAR)?;

        let mut body = json!({
            "model": API_MODEL,
            "prompt": input.prompt,
            "prompt_optimizer": bool_param(input.params, "prompt_optimizer").unwrap_or(true),
            "duration": int_param(input.params, "duration").unwrap_or(DEFAULT_DURATION),
            "resolution": str_param(input.params, "resolution").unwrap_or(DEFAULT_RESOLUTION),
        });
        if let Some(url) = input.source_url() {
            body["first_frame_image"] = json!(url);
        }

        let response = send_json(
            NAME,
            self.client
                .post(format!("{}/minimaxi/v1/video_generation", self.base_url))
                .bearer_auth(api_key)
                .json(&body),
        )
        .await?;
        Self::check_base_resp(&response)?;

        let task_id = first_str(&response, &["/task_id", "/id", "/taskId"])
            .ok_or_else(|| GenflowError::provider(NAME, "response is missing task_id"))?;

        tracing::info!(task_id = %task_id, "Hailuo task submitted");
        Ok(SubmitResult::accepted(task_id))
    }

    async fn poll(&self, provider_task_id: &str) -> GenflowResult<PollResult> {
        let api_key = require_key(&self.api_key, KEY_VAR)?;
        let response = send_json(
            NAME,
            self.client
                .get(format!("{}/minimaxi/v1/query/video_generation", self.base_url))
                .query(&[("task_id", provider_task_id)])
                .bearer_auth(api_key),
        )
        .await?;
        Self::check_base_resp(&response)?;

        let raw_status = first_str(&response, &["/status", "/data/status"]).ok_or_else(|| {
            GenflowError::malformed(NAME, "query response has no status")
        })?;
        if raw_status != SUCCESS {
            return Ok(PollResult::new(raw_status).with_error(
                response
                    .pointer("/base_resp/status_msg")
                    .and_then(Value::as_str)
                    .filter(|m| *m != "success")
                    .map(str::to_string),
            ));
        }

        let file_id = first_str(&response, &["/file_id", "/data/file_id"]);
        poll_in_order(NAME, URL_SOURCES, |source| {
            let response = &response;
            let file_id = file_id.as_deref();
            async move {
                let url = match source {
                    UrlSource::Query => first_str(
                        response,
                        &["/video_url", "/file/download_url", "/data/video_url"],
                    )
                    .ok_or_else(|| GenflowError::malformed(NAME, "query response carries no URL"))?,
                    UrlSource::FileRetrieve => {
                        let file_id = file_id.ok_or_else(|| {
                            GenflowError::malformed(NAME, "query response carries no file_id")
                        })?;
                        self.download_url(api_key, file_id).await?
                    }
                };
                Ok::<_, GenflowError>(PollResult::new(SUCCESS).with_result_url(Some(url)))
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::normalize;
    use genflow_core::models::CanonicalStatus;
    use mockito::Matcher;

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn full_hd_only_allows_six_seconds() {
        let adapter = HailuoAdapter::new("http://localhost", None).unwrap();
        assert!(adapter
            .validate_params(&params(json!({"resolution": "1080P", "duration": 6})))
            .is_ok());
        let err = adapter
            .validate_params(&params(json!({"resolution": "1080P", "duration": 10})))
            .unwrap_err();
        assert!(matches!(err, GenflowError::Validation { .. }));
        assert!(adapter
            .validate_params(&params(json!({"resolution": "768P", "duration": 10})))
            .is_ok());
        assert!(adapter
            .validate_params(&params(json!({"duration": 8})))
            .is_err());
    }

    #[tokio::test]
    async fn base_resp_error_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/minimaxi/v1/video_generation")
            .with_status(200)
            .with_body(r#"{"task_id":"","base_resp":{"status_code":1026,"status_msg":"input new_sensitive"}}"#)
            .create_async()
            .await;

        let adapter = HailuoAdapter::new(server.url(), Some("k".to_string())).unwrap();
        let p = Parameters::new();
        let err = adapter
            .submit(SubmitInput {
                prompt: "x",
                source: None,
                params: &p,
            })
            .await
            .unwrap_err();
        assert_eq!(err.provider_message(), Some("input new_sensitive"));
    }

    #[tokio::test]
    async fn success_resolves_file_id_to_download_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/minimaxi/v1/query/video_generation")
            .match_query(Matcher::UrlEncoded("task_id".into(), "hl-1".into()))
            .with_status(200)
            .with_body(r#"{"task_id":"hl-1","status":"Success","file_id":"f-9","base_resp":{"status_code":0,"status_msg":"success"}}"#)
            .create_async()
            .await;
        let retrieve = server
            .mock("GET", "/minimaxi/v1/files/retrieve")
            .match_query(Matcher::UrlEncoded("file_id".into(), "f-9".into()))
            .with_status(200)
            .with_body(r#"{"file":{"file_id":"f-9","download_url":"https://files.minimax.io/f-9.mp4"},"base_resp":{"status_code":0}}"#)
            .expect(1)
            .create_async()
            .await;

        let adapter = HailuoAdapter::new(server.url(), Some("k".to_string())).unwrap();
        let poll = adapter.poll("hl-1").await.unwrap();
        retrieve.assert_async().await;

        let observation = normalize(adapter.vocabulary(), &poll, Duration::ZERO, Duration::from_secs(60));
        assert_eq!(observation.status, CanonicalStatus::Completed);
        assert_eq!(
            observation.result_url.as_deref(),
            Some("https://files.minimax.io/f-9.mp4")
        );
    }

    #[tokio::test]
    async fn failed_file_lookup_keeps_job_in_flight() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/minimaxi/v1/query/video_generation")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"Success","file_id":"f-9","base_resp":{"status_code":0}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/minimaxi/v1/files/retrieve")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let adapter = HailuoAdapter::new(server.url(), Some("k".to_string())).unwrap();
        let poll = adapter.poll("hl-1").await.unwrap();
        assert_eq!(adapter.vocabulary().classify(&poll), CanonicalStatus::Processing);
    }

    #[test]
    fn queue_words_are_pending() {
        let adapter = HailuoAdapter::new("http://localhost", None).unwrap();
        for raw in ["Queueing", "Preparing"] {
            assert_eq!(
                adapter.vocabulary().classify(&PollResult::new(raw)),
                CanonicalStatus::Pending
            );
        }
        assert_eq!(
            adapter.vocabulary().classify(&PollResult::new("Fail")),
            CanonicalStatus::Failed
        );
    }

    #[tokio::test]
    async fn inline_url_skips_file_lookup() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/minimaxi/v1/query/video_generation")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"Success","file_id":"f-3","video_url":"https://cdn.302.ai/hl-3.mp4","base_resp":{"status_code":0}}"#)
            .create_async()
            .await;
        let retrieve = server
            .mock("GET", "/minimaxi/v1/files/retrieve")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let adapter = HailuoAdapter::new(server.url(), Some("k".to_string())).unwrap();
        let poll = adapter.poll("hl-3").await.unwrap();
        retrieve.assert_async().await;
        assert_eq!(poll.result_url.as_deref(), Some("https://cdn.302.ai/hl-3.mp4"));
    }

    #[tokio::test]
    async fn query_rejection_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/minimaxi/v1/query/video_generation")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"base_resp":{"status_code":1027,"status_msg":"output new_sensitive"}}"#)
            .create_async()
            .await;

        let adapter = HailuoAdapter::new(server.url(), Some("k".to_string())).unwrap();
        let err = adapter.poll("hl-4").await.unwrap_err();
        assert_eq!(err.provider_message(), Some("output new_sensitive"));
    }
}
