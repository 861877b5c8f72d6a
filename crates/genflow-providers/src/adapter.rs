//! Provider adapter contract
//!
//! An adapter translates between the canonical job contract and one provider's wire
//! format. Adapters are registered in an [`crate::AdapterRegistry`] keyed by
//! provider/model id and dispatched polymorphically.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

use genflow_core::models::{CanonicalStatus, MediaKind, Parameters, StagedAsset};
use genflow_core::GenflowResult;

use crate::params::ParamSpec;
use crate::status::StatusVocabulary;

/// How an adapter authenticates its requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// Static `Authorization: Bearer <key>`
    Bearer,
    /// Canonical-request HMAC signature headers
    Signed,
}

impl Display for AuthScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AuthScheme::Bearer => write!(f, "bearer"),
            AuthScheme::Signed => write!(f, "signed"),
        }
    }
}

/// Adapter descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterInfo {
    pub name: String,
    pub description: String,
    pub auth_scheme: AuthScheme,
    pub media_kind: MediaKind,
    /// Whether submit needs a source image URL
    pub requires_source: bool,
    /// Whether the artifact is returned directly by submit
    pub synchronous: bool,
}

/// Everything an adapter needs for one submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitInput<'a> {
    pub prompt: &'a str,
    pub source: Option<&'a StagedAsset>,
    pub params: &'a Parameters,
}

impl<'a> SubmitInput<'a> {
    pub fn source_url(&self) -> Option<&'a str> {
        self.source.map(|asset| asset.durable_url.as_str())
    }
}

/// Outcome of a successful submit call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub provider_task_id: String,
    /// Terminal for synchronous providers; polling is skipped in that case
    pub initial_status: CanonicalStatus,
    pub result_url: Option<String>,
}

impl SubmitResult {
    pub fn accepted(provider_task_id: impl Into<String>) -> Self {
        Self {
            provider_task_id: provider_task_id.into(),
            initial_status: CanonicalStatus::Pending,
            result_url: None,
        }
    }

    pub fn completed(provider_task_id: impl Into<String>, result_url: impl Into<String>) -> Self {
        Self {
            provider_task_id: provider_task_id.into(),
            initial_status: CanonicalStatus::Completed,
            result_url: Some(result_url.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.initial_status.is_terminal()
    }
}

/// Raw, provider-shaped poll observation (before normalization)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResult {
    pub raw_status: String,
    pub progress: Option<u8>,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
}

impl PollResult {
    pub fn new(raw_status: impl Into<String>) -> Self {
        Self {
            raw_status: raw_status.into(),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: Option<u8>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_result_url(mut self, url: Option<String>) -> Self {
        self.result_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn with_error(mut self, message: Option<String>) -> Self {
        self.error_message = message;
        self
    }

    /// Still-pending answer used when no strategy produced a usable response
    pub fn soft_processing(reason: impl Into<String>) -> Self {
        Self {
            raw_status: "processing".to_string(),
            progress: None,
            result_url: None,
            error_message: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync + Debug {
    /// Provider/model id used as the registry key
    fn name(&self) -> &str;

    fn info(&self) -> AdapterInfo;

    /// Allowed parameters and values
    fn param_spec(&self) -> &ParamSpec;

    /// Raw status synonyms for this provider
    fn vocabulary(&self) -> &StatusVocabulary;

    /// Validate parameters before any network call.
    ///
    /// The default checks the allow-list; adapters with cross-field rules extend it.
    fn validate_params(&self, params: &Parameters) -> GenflowResult<()> {
        self.param_spec().validate(self.name(), params)
    }

    async fn submit(&self, input: SubmitInput<'_>) -> GenflowResult<SubmitResult>;

    async fn poll(&self, provider_task_id: &str) -> GenflowResult<PollResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_result_urls_are_dropped() {
        let poll = PollResult::new("succeeded").with_result_url(Some("  ".to_string()));
        assert!(poll.result_url.is_none());
    }

    #[test]
    fn synchronous_submit_is_terminal() {
        assert!(SubmitResult::completed("seedream-1", "https://cdn.example.com/a.png").is_terminal());
        assert!(!SubmitResult::accepted("task-1").is_terminal());
    }
}
