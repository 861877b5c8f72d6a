//! Volcengine Visual API, Jimeng image-to-video 3.0 Pro
//!
//! Every request is signed (see [`crate::signing`]). Both calls are `POST /` with an
//! `Action` query parameter: `CVSync2AsyncSubmitTask` to submit and
//! `CVSync2AsyncGetResult` to poll. Responses come either wrapped in `data`, wrapped in
//! `Result`, or flat, and errors arrive in `ResponseMetadata.Error`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use genflow_core::models::MediaKind;
use genflow_core::{GenflowError, GenflowResult};

use crate::adapter::{AdapterInfo, AuthScheme, PollResult, ProviderAdapter, SubmitInput, SubmitResult};
use crate::http::{build_client, error_message, first_str, send_json};
use crate::params::{int_param, str_param, ParamRule, ParamSpec};
use crate::signing::{canonical_query_string, RequestParts, SigningContext};
use crate::status::StatusVocabulary;
use crate::strategy::{parse_first, EnvelopeParser};

pub const NAME: &str = "volcengine-video-3.0-pro";
const REQ_KEY: &str = "jimeng_ti2v_v30_pro";
const API_VERSION: &str = "2022-08-31";
const SUBMIT_ACTION: &str = "CVSync2AsyncSubmitTask";
const RESULT_ACTION: &str = "CVSync2AsyncGetResult";
const CONTENT_TYPE: &str = "application/json";
const SUCCESS_CODE: i64 = 10000;

const ENVELOPES: &[(&str, EnvelopeParser)] = &[
    ("data", parse_data_envelope),
    ("result", parse_result_envelope),
    ("flat", parse_flat),
];

pub struct VolcengineAdapter {
    client: Client,
    base_url: String,
    host: String,
    signer: Option<SigningContext>,
    params: ParamSpec,
    vocabulary: StatusVocabulary,
}

impl Debug for VolcengineAdapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VolcengineAdapter")
            .field("base_url", &self.base_url)
            .field("signer", &self.signer)
            .finish()
    }
}

impl VolcengineAdapter {
    pub fn new(base_url: impl Into<String>, signer: Option<SigningContext>) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url)
            .map_err(|e| anyhow::anyhow!("Invalid Volcengine base URL '{}': {}", base_url, e))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => anyhow::bail!("Volcengine base URL '{}' has no host", base_url),
        };

        Ok(Self {
            client: build_client(Duration::from_secs(60), "Volcengine Visual")?,
            base_url,
            host,
            signer,
            params: ParamSpec::new()
                .allow("duration", ParamRule::IntOneOf(&[5, 10]))
                .allow(
                    "aspect_ratio",
                    ParamRule::OneOf(&["16:9", "4:3", "1:1", "3:4", "9:16", "21:9"]),
                )
                .allow("seed", ParamRule::IntRange { min: -1, max: i64::from(u32::MAX) }),
            vocabulary: StatusVocabulary::default()
                .with_completed(&["done"])
                .with_failed(&["not_found", "expired"])
                .with_queued(&["in_queue"]),
        })
    }

    async fn call(&self, action: &str, body: &Value) -> GenflowResult<Value> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            GenflowError::Config(
                "VOLCENGINE_ACCESS_KEY and VOLCENGINE_SECRET_KEY not configured".to_string(),
            )
        })?;

        let payload = serde_json::to_vec(body)?;
        let query = [("Action", action), ("Version", API_VERSION)];
        let headers = signer.sign(
            &RequestParts {
                method: "POST",
                uri: "/",
                query: &query,
                host: &self.host,
                content_type: CONTENT_TYPE,
                body: &payload,
            },
            Utc::now(),
        )?;

        let url = format!("{}/?{}", self.base_url, canonical_query_string(&query));
        let response = send_json(NAME, headers.apply(self.client.post(url)).body(payload)).await?;
        check_response(&response)?;
        Ok(response)
    }
}

/// `ResponseMetadata.Error`, or a `code` other than 10000, is a provider rejection
fn check_response(body: &Value) -> GenflowResult<()> {
    if body.pointer("/ResponseMetadata/Error").is_some() {
        return Err(GenflowError::provider(
            NAME,
            first_str(
                body,
                &["/ResponseMetadata/Error/Message", "/ResponseMetadata/Error/Code"],
            )
            .unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    match body.get("code").and_then(Value::as_i64) {
        Some(code) if code != SUCCESS_CODE => Err(GenflowError::provider(
            NAME,
            error_message(body).unwrap_or_else(|| format!("error code {}", code)),
        )),
        _ => Ok(()),
    }
}

fn parse_task(task: &Value) -> Option<PollResult> {
    let status = first_str(task, &["/status", "/Status", "/state"])?;
    let url = first_str(task, &["/video_url", "/videoUrl", "/output_url"]);
    let progress = task
        .get("progress")
        .and_then(Value::as_u64)
        .map(|p| p.min(100) as u8);
    Some(
        PollResult::new(status)
            .with_progress(progress)
            .with_result_url(url),
    )
}

fn parse_data_envelope(body: &Value) -> Option<PollResult> {
    let poll = parse_task(body.get("data")?)?;
    Some(poll.with_error(first_str(body, &["/message"]).filter(|m| m != "Success")))
}

fn parse_result_envelope(body: &Value) -> Option<PollResult> {
    let result = body.get("Result")?;
    parse_task(result.get("data").unwrap_or(result))
}

fn parse_flat(body: &Value) -> Option<PollResult> {
    parse_task(body)
}

#[async_trait]
impl ProviderAdapter for VolcengineAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: NAME.to_string(),
            description: "Jimeng image-to-video 3.0 Pro (Volcengine Visual API, signed)".to_string(),
            auth_scheme: AuthScheme::Signed,
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
        let image_url = input
            .source_url()
            .ok_or_else(|| GenflowError::validation(NAME, "a source image is required"))?;

        let frames = match int_param(input.params, "duration").unwrap_or(5) {
            10 => 241,
            _ => 121,
        };
        let mut body = json!({
            "req_key": REQ_KEY,
            "image_urls": [image_url],
            "seed": int_param(input.params, "seed").unwrap_or(-1),
            "frames": frames,
        });
        if !input.prompt.is_empty() {
            body["prompt"] = json!(input.prompt);
        }
        if let Some(ratio) = str_param(input.params, "aspect_ratio") {
            body["aspect_ratio"] = json!(ratio);
        }

        let response = self.call(SUBMIT_ACTION, &body).await?;

        if let Some(task_id) = first_str(
            &response,
            &["/data/task_id", "/Result/task_id", "/Result/data/task_id", "/task_id"],
        ) {
            tracing::info!(task_id = %task_id, frames, "Volcengine task submitted");
            return Ok(SubmitResult::accepted(task_id));
        }

        // Some accounts get the video back in the submit response
        match first_str(
            &response,
            &["/data/video_url", "/Result/video_url", "/video_url", "/videoUrl"],
        ) {
            Some(url) => Ok(SubmitResult::completed(
                format!("volc-{}", Utc::now().timestamp_millis()),
                url,
            )),
            None => Err(GenflowError::provider(
                NAME,
                "response has neither task_id nor video_url",
            )),
        }
    }

    async fn poll(&self, provider_task_id: &str) -> GenflowResult<PollResult> {
        let body = json!({ "req_key": REQ_KEY, "task_id": provider_task_id });
        let response = self.call(RESULT_ACTION, &body).await?;
        parse_first(NAME, &response, ENVELOPES)
    }
}
