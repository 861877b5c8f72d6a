//! Shared HTTP plumbing for adapters
//!
//! Maps reqwest failures and HTTP statuses onto the error taxonomy:
//! connection problems, 5xx and 429 are `Transport` (retryable); other non-2xx
//! answers are `Provider` errors carrying the most specific message the body offers.
//! A 2xx body that is not JSON is `Malformed`.

use anyhow::Context;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;

use genflow_core::{GenflowError, GenflowResult};

const MAX_MESSAGE_CHARS: usize = 500;

/// Build a client with a request timeout
pub fn build_client(timeout: Duration, label: &str) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .with_context(|| format!("Failed to create HTTP client for {}", label))
}

/// Send a request and decode its JSON body
pub async fn send_json(provider: &str, request: RequestBuilder) -> GenflowResult<Value> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(status_error(provider, status, &text));
    }

    serde_json::from_str(&text).map_err(|e| {
        GenflowError::malformed(
            provider,
            format!("unparseable response ({}): {}", e, truncate(&text)),
        )
    })
}

pub fn transport_error(err: reqwest::Error) -> GenflowError {
    let message = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    };
    match err.status() {
        Some(status) => GenflowError::transport_status(status.as_u16(), message),
        None => GenflowError::transport(message),
    }
}

pub fn status_error(provider: &str, status: StatusCode, body: &str) -> GenflowError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| error_message(&json))
        .unwrap_or_else(|| truncate(body));

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        GenflowError::transport_status(status.as_u16(), format!("HTTP {}: {}", status, detail))
    } else {
        GenflowError::provider(provider, detail)
    }
}

/// Most specific error message found in a provider's JSON body
pub fn error_message(body: &Value) -> Option<String> {
    const POINTERS: &[&str] = &[
        "/ResponseMetadata/Error/Message",
        "/error/message",
        "/base_resp/status_msg",
        "/output/message",
        "/message",
        "/msg",
        "/error",
    ];

    POINTERS
        .iter()
        .filter_map(|pointer| body.pointer(pointer))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|message| !message.is_empty())
        .map(truncate)
}

pub fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{}...", cut)
    }
}

/// First non-empty string found at any of `pointers`
pub fn first_str(body: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|pointer| body.pointer(pointer))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
