//! Scripted adapter for unit and integration tests
//!
//! No network access: submit and poll answers are queued up front.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use genflow_core::models::{MediaKind, Parameters};
use genflow_core::{GenflowError, GenflowResult};

use crate::adapter::{AdapterInfo, AuthScheme, PollResult, ProviderAdapter, SubmitInput, SubmitResult};
use crate::params::ParamSpec;
use crate::status::StatusVocabulary;

/// Submit call as seen by a [`MockAdapter`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSubmit {
    pub prompt: String,
    pub source_url: Option<String>,
    pub params: Parameters,
}

#[derive(Debug)]
pub struct MockAdapter {
    name: String,
    media_kind: MediaKind,
    requires_source: bool,
    param_spec: ParamSpec,
    vocabulary: StatusVocabulary,
    submit_outcomes: Mutex<VecDeque<GenflowResult<SubmitResult>>>,
    poll_outcomes: Mutex<VecDeque<GenflowResult<PollResult>>>,
    /// Answer once the poll script runs out
    idle_poll: PollResult,
    submits: Mutex<Vec<RecordedSubmit>>,
    polls: AtomicUsize,
}

impl MockAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            media_kind: MediaKind::Video,
            requires_source: false,
            param_spec: ParamSpec::new(),
            vocabulary: StatusVocabulary::default(),
            submit_outcomes: Mutex::new(VecDeque::new()),
            poll_outcomes: Mutex::new(VecDeque::new()),
            idle_poll: PollResult::new("queued"),
            submits: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn with_media_kind(mut self, media_kind: MediaKind) -> Self {
        self.media_kind = media_kind;
        self
    }

    pub fn requiring_source(mut self) -> Self {
        self.requires_source = true;
        self
    }

    pub fn with_param_spec(mut self, spec: ParamSpec) -> Self {
        self.param_spec = spec;
        self
    }

    pub fn with_submit(self, result: SubmitResult) -> Self {
        self.push_submit(Ok(result));
        self
    }

    pub fn with_submit_error(self, err: GenflowError) -> Self {
        self.push_submit(Err(err));
        self
    }

    pub fn with_polls(self, polls: impl IntoIterator<Item = GenflowResult<PollResult>>) -> Self {
        self.poll_outcomes
            .lock()
            .unwrap()
            .extend(polls);
        self
    }

    pub fn then_forever(mut self, poll: PollResult) -> Self {
        self.idle_poll = poll;
        self
    }

    fn push_submit(&self, outcome: GenflowResult<SubmitResult>) {
        self.submit_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().unwrap().len()
    }

    pub fn submits(&self) -> Vec<RecordedSubmit> {
        self.submits.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.name.clone(),
            description: "Scripted test adapter".to_string(),
            auth_scheme: AuthScheme::Bearer,
            media_kind: self.media_kind,
            requires_source: self.requires_source,
            synchronous: false,
        }
    }

    fn param_spec(&self) -> &ParamSpec {
        &self.param_spec
    }

    fn vocabulary(&self) -> &StatusVocabulary {
        &self.vocabulary
    }

    async fn submit(&self, input: SubmitInput<'_>) -> GenflowResult<SubmitResult> {
        let count = {
            let mut submits = self.submits.lock().unwrap();
            submits.push(RecordedSubmit {
                prompt: input.prompt.to_string(),
                source_url: input.source_url().map(str::to_string),
                params: input.params.clone(),
            });
            submits.len()
        };

        self.submit_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SubmitResult::accepted(format!("{}-task-{}", self.name, count))))
    }

    async fn poll(&self, _provider_task_id: &str) -> GenflowResult<PollResult> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.poll_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.idle_poll.clone()))
    }
}
