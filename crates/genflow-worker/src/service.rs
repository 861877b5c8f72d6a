//! Job service: the inbound surface of the orchestrator
//!
//! `submit` validates, stages and submits synchronously, then hands the job to a
//! background polling task and returns at once. Each job gets its own task and its
//! own `watch` channel; the task is the only writer, so status reads never block on
//! a poll in progress and the final result is published once.
//!
//! Finished jobs stay queryable for the configured retention and are evicted by the
//! next `submit` or `resume` after that.

use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::Validate;

use genflow_core::config::PollingSettings;
use genflow_core::models::{CanonicalStatus, GenerationRequest, Job, JobStatusView, SubmitResponse};
use genflow_core::{Config, ErrorMetadata, GenflowError, GenflowResult, LogLevel};
use genflow_providers::{
    build_registry, AdapterInfo, AdapterRegistry, FallbackChain, ProviderAdapter, Stager,
    SubmitInput,
};
use genflow_storage::create_storage;

use crate::locks::ResourceLocks;
use crate::orchestrator::{self, PollingConfig};

/// Latest view of a job, as published by its polling task
#[derive(Debug, Clone)]
pub struct JobState {
    pub job: Job,
    /// Set exactly once, when polling stops
    pub outcome: Option<GenflowResult<()>>,
    pub finished_at: Option<Instant>,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    fn expired(&self, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|finished| finished.elapsed() >= retention)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub polling: PollingSettings,
    /// (primary, secondary) provider pairs
    pub fallbacks: Vec<(String, String)>,
    pub resource_lock_cooldown: Duration,
    pub finished_job_retention: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            polling: PollingSettings::default(),
            fallbacks: Vec::new(),
            resource_lock_cooldown: Duration::from_secs(10),
            finished_job_retention: Duration::from_secs(3600),
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            polling: config.polling.clone(),
            fallbacks: config.fallbacks.clone(),
            resource_lock_cooldown: config.resource_lock_cooldown(),
            finished_job_retention: config.finished_job_retention(),
        }
    }
}

struct JobHandle {
    state: watch::Receiver<JobState>,
    cancel: CancellationToken,
}

struct ServiceInner {
    registry: AdapterRegistry,
    fallback: FallbackChain,
    stager: Stager,
    polling: PollingSettings,
    locks: ResourceLocks,
    retention: Duration,
    jobs: RwLock<HashMap<Uuid, JobHandle>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct JobService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobService")
            .field("fallback", &self.inner.fallback)
            .field("polling", &self.inner.polling)
            .finish_non_exhaustive()
    }
}

impl JobService {
    pub fn new(
        registry: AdapterRegistry,
        stager: Stager,
        options: ServiceOptions,
    ) -> anyhow::Result<Self> {
        let fallback = FallbackChain::new(registry.clone(), options.fallbacks)
            .context("Failed to build provider fallback chain")?;

        Ok(Self {
            inner: Arc::new(ServiceInner {
                registry,
                fallback,
                stager,
                polling: options.polling,
                locks: ResourceLocks::new(options.resource_lock_cooldown),
                retention: options.finished_job_retention,
                jobs: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Storage, adapters and options all taken from `config`
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let storage = create_storage(config)
            .await
            .context("Failed to initialize staging storage")?;
        let registry = build_registry(config)
            .await
            .context("Failed to register provider adapters")?;
        let stager = Stager::new(storage)?;

        for (primary, secondary) in &config.fallbacks {
            if !registry.contains(secondary).await {
                tracing::warn!(
                    primary = %primary,
                    secondary = %secondary,
                    "Configured fallback provider is not registered"
                );
            }
        }

        Self::new(registry, stager, ServiceOptions::from_config(config))
    }

    pub async fn providers(&self) -> Vec<AdapterInfo> {
        self.inner.registry.list().await
    }

    /// Validate, stage, submit and start polling.
    ///
    /// Returns as soon as a provider accepted the job. Deterministic failures (bad
    /// input, rejected parameters, staging storage errors, a busy resource) abort here
    /// before any provider call.
    #[tracing::instrument(
        skip(self, request),
        fields(provider = %request.provider_hint, media_kind = %request.media_kind)
    )]
    pub async fn submit(&self, request: GenerationRequest) -> GenflowResult<SubmitResponse> {
        request
            .validate()
            .map_err(|e| GenflowError::Input(e.to_string()))?;

        let adapter = self
            .inner
            .registry
            .get(&request.provider_hint)
            .await
            .map_err(|e| GenflowError::NotFound(e.to_string()))?;
        let info = adapter.info();

        if info.media_kind != request.media_kind {
            return Err(GenflowError::validation(
                &info.name,
                format!(
                    "provider generates {}, not {}",
                    info.media_kind, request.media_kind
                ),
            ));
        }
        adapter.validate_params(&request.parameters)?;
        if info.requires_source && request.source_asset.is_none() {
            return Err(GenflowError::validation(&info.name, "a source asset is required"));
        }

        // Held through staging and submit; the cooldown starts when it drops
        let _guard = match request.resource_id.as_deref() {
            Some(resource_id) => Some(self.inner.locks.try_acquire(resource_id)?),
            None => None,
        };

        let staged = match &request.source_asset {
            Some(asset) => Some(
                self.inner
                    .stager
                    .stage(asset, request.resource_id.as_deref())
                    .await?,
            ),
            None => None,
        };

        let input = SubmitInput {
            prompt: &request.prompt,
            source: staged.as_ref(),
            params: &request.parameters,
        };
        let outcome = self.inner.fallback.submit(adapter, input).await?;

        let mut job = Job::new(
            outcome.provider.clone(),
            outcome.result.provider_task_id.clone(),
            request.media_kind,
        );
        if outcome.result.initial_status != CanonicalStatus::Pending {
            let progress = if outcome.result.is_terminal() { 100 } else { 0 };
            job.apply(
                outcome.result.initial_status,
                progress,
                outcome.result.result_url.clone(),
                None,
            );
        }

        tracing::info!(
            job_id = %job.id,
            accepted_by = %job.provider,
            task_id = %job.provider_task_id,
            fell_back = outcome.fell_back,
            status = %job.canonical_status,
            "Job submitted"
        );

        let response = SubmitResponse {
            job_id: job.id,
            provider: job.provider.clone(),
            status: job.canonical_status,
        };
        self.track(job, outcome.adapter).await;
        Ok(response)
    }

    /// Register the job and start its polling task
    async fn track(&self, job: Job, adapter: Arc<dyn ProviderAdapter>) {
        self.evict_finished().await;

        let job_id = job.id;
        let config = PollingConfig::from_settings(&self.inner.polling, job.media_kind);
        let cancel = self.inner.shutdown.child_token();
        let (tx, rx) = watch::channel(JobState {
            job: job.clone(),
            outcome: None,
            finished_at: None,
        });

        self.inner.jobs.write().await.insert(
            job_id,
            JobHandle {
                state: rx,
                cancel: cancel.clone(),
            },
        );

        tokio::spawn(async move {
            let mut job = job;
            let result = orchestrator::run(adapter.as_ref(), &mut job, &config, &cancel, |current| {
                tx.send_modify(|state| state.job = current.clone());
            })
            .await;

            if let Err(err) = &result {
                log_poll_error(&job, err);
            }
            tx.send_replace(JobState {
                job,
                outcome: Some(result),
                finished_at: Some(Instant::now()),
            });
        });
    }

    /// Drop jobs that finished longer than the retention ago. Returns how many went.
    pub async fn evict_finished(&self) -> usize {
        let retention = self.inner.retention;
        let mut jobs = self.inner.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, handle| !handle.state.borrow().expired(retention));
        let evicted = before - jobs.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = jobs.len(), "Evicted finished jobs");
        }
        evicted
    }

    async fn state(&self, job_id: Uuid) -> GenflowResult<watch::Receiver<JobState>> {
        self.inner
            .jobs
            .read()
            .await
            .get(&job_id)
            .map(|handle| handle.state.clone())
            .ok_or_else(|| GenflowError::NotFound(format!("job {}", job_id)))
    }

    /// Current job record
    pub async fn get_job(&self, job_id: Uuid) -> GenflowResult<Job> {
        Ok(self.state(job_id).await?.borrow().job.clone())
    }

    /// Status snapshot. If polling stopped without a terminal state (timeout,
    /// cancellation, repeated transport failures) the reason is reported in `error`.
    pub async fn get_status(&self, job_id: Uuid) -> GenflowResult<JobStatusView> {
        let rx = self.state(job_id).await?;
        let state = rx.borrow();
        let mut view = state.job.status_view();
        if let Some(Err(err)) = &state.outcome {
            if view.error.is_none() {
                view.error = Some(err.to_string());
            }
        }
        Ok(view)
    }

    /// Receiver that observes every published update of the job
    pub async fn subscribe(&self, job_id: Uuid) -> GenflowResult<watch::Receiver<JobState>> {
        self.state(job_id).await
    }

    /// Wait until polling stops.
    ///
    /// `Ok(job)` when the job completed; the provider's own error when it failed;
    /// otherwise the error that stopped polling.
    pub async fn wait(&self, job_id: Uuid) -> GenflowResult<Job> {
        let mut rx = self.state(job_id).await?;
        let state = rx
            .wait_for(JobState::is_finished)
            .await
            .map_err(|_| {
                GenflowError::Internal(format!("polling task for job {} ended unexpectedly", job_id))
            })?
            .clone();

        match state.outcome {
            Some(Ok(())) => orchestrator::terminal_result(&state.job),
            Some(Err(err)) => Err(err),
            None => Err(GenflowError::Internal(format!("job {} has no outcome", job_id))),
        }
    }

    /// Stop polling a job. The provider-side job is left untouched.
    pub async fn cancel(&self, job_id: Uuid) -> GenflowResult<()> {
        let jobs = self.inner.jobs.read().await;
        let handle = jobs
            .get(&job_id)
            .ok_or_else(|| GenflowError::NotFound(format!("job {}", job_id)))?;
        handle.cancel.cancel();
        tracing::info!(job_id = %job_id, "Job polling cancelled");
        Ok(())
    }

    /// Restart polling for a job that stopped short of a terminal state, with a
    /// fresh budget.
    pub async fn resume(&self, job_id: Uuid) -> GenflowResult<()> {
        let state = self.state(job_id).await?.borrow().clone();
        if state.job.is_terminal() {
            return Ok(());
        }
        if !state.is_finished() {
            return Err(GenflowError::ResourceBusy(format!(
                "job {} is still being polled",
                job_id
            )));
        }

        let adapter = self
            .inner
            .registry
            .get(&state.job.provider)
            .await
            .map_err(|e| GenflowError::NotFound(e.to_string()))?;
        tracing::info!(job_id = %job_id, status = %state.job.canonical_status, "Resuming job polling");
        self.track(state.job, adapter).await;
        Ok(())
    }

    /// Cancel every polling task
    pub fn shutdown(&self) {
        tracing::info!("Job service shutting down");
        self.inner.shutdown.cancel();
    }
}

fn log_poll_error(job: &Job, err: &GenflowError) {
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(
            job_id = %job.id,
            error_code = err.error_code(),
            error = %err,
            "Polling stopped"
        ),
        LogLevel::Warn => tracing::warn!(
            job_id = %job.id,
            error_code = err.error_code(),
            status = %job.canonical_status,
            error = %err,
            "Polling stopped before a terminal state"
        ),
        LogLevel::Error => tracing::error!(
            job_id = %job.id,
            error_code = err.error_code(),
            error = %err,
            "Polling failed"
        ),
    }
}
