//! Per-job polling loop
//!
//! One call to [`run`] drives one job from submission to a terminal state. Polls are
//! strictly sequential: the next request is only issued after the previous one has
//! been normalized and applied.
//!
//! Budget accounting: only polls that produced an observation consume the timeout
//! budget (one interval each). Transport failures are retried with backoff and do
//! not consume budget, but `max_consecutive_transport_errors` of them in a row end
//! the loop with the last transport error. An unreadable body counts as one uneventful
//! cycle. A provider rejection fails the job with the provider's message.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use genflow_core::config::{PollingSettings, DEFAULT_MAX_CONSECUTIVE_TRANSPORT_ERRORS};
use genflow_core::models::{CanonicalStatus, Job, MediaKind};
use genflow_core::{GenflowError, GenflowResult};
use genflow_providers::{normalize, ProviderAdapter};

/// Cap for the extra delay after repeated transport failures
pub const MAX_TRANSPORT_BACKOFF_SECS: u64 = 60;

/// Typical run times, used to estimate progress when a provider reports none
const EXPECTED_IMAGE_DURATION: Duration = Duration::from_secs(30);
const EXPECTED_VIDEO_DURATION: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_consecutive_transport_errors: u32,
    pub expected_duration: Duration,
}

impl PollingConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            max_consecutive_transport_errors: DEFAULT_MAX_CONSECUTIVE_TRANSPORT_ERRORS,
            expected_duration: EXPECTED_VIDEO_DURATION.min(timeout),
        }
    }

    pub fn from_settings(settings: &PollingSettings, media_kind: MediaKind) -> Self {
        let (interval, timeout) = settings.budget_for(media_kind);
        let expected = match media_kind {
            MediaKind::Image => EXPECTED_IMAGE_DURATION,
            MediaKind::Video => EXPECTED_VIDEO_DURATION,
        };
        Self {
            interval,
            timeout,
            max_consecutive_transport_errors: settings.max_consecutive_transport_errors.max(1),
            expected_duration: expected.min(timeout),
        }
    }

    pub fn with_max_consecutive_transport_errors(mut self, max: u32) -> Self {
        self.max_consecutive_transport_errors = max.max(1);
        self
    }
}

/// Exponential backoff in seconds after `consecutive` transport failures, capped
pub(crate) fn compute_transport_backoff_seconds(consecutive: u32) -> u64 {
    2_u64
        .saturating_pow(consecutive)
        .min(MAX_TRANSPORT_BACKOFF_SECS)
}

fn cancelled(job: &Job) -> GenflowError {
    GenflowError::Cancelled(format!("polling for job {} was cancelled", job.id))
}

/// Poll `adapter` until `job` is terminal.
///
/// Returns `Ok(())` once the job reached Completed or Failed; the outcome is on the
/// job itself. `on_update` sees the job after every applied observation. A job that
/// is already terminal (synchronous providers) returns immediately without polling.
///
/// Errors leave the job in its last non-terminal state: `Timeout` when the budget
/// ran out, `Cancelled` when `cancel` fired, or the escalated poll error.
#[tracing::instrument(
    skip_all,
    fields(job_id = %job.id, provider = %job.provider, task_id = %job.provider_task_id)
)]
pub async fn run<F>(
    adapter: &dyn ProviderAdapter,
    job: &mut Job,
    config: &PollingConfig,
    cancel: &CancellationToken,
    mut on_update: F,
) -> GenflowResult<()>
where
    F: FnMut(&Job) + Send,
{
    if job.is_terminal() {
        tracing::debug!(status = %job.canonical_status, "Job terminal at submit, nothing to poll");
        return Ok(());
    }

    let started = Instant::now();
    let mut budget_used = Duration::ZERO;
    let mut consecutive_transport_errors = 0u32;
    let mut delay = config.interval;

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        timeout_secs = config.timeout.as_secs(),
        "Polling started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(job)),
            _ = sleep(delay) => {}
        }

        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(job)),
            result = adapter.poll(&job.provider_task_id) => result,
        };

        match polled {
            Ok(raw) => {
                consecutive_transport_errors = 0;
                delay = config.interval;

                let observation = normalize(
                    adapter.vocabulary(),
                    &raw,
                    started.elapsed(),
                    config.expected_duration,
                );
                let changed = job.apply(
                    observation.status,
                    observation.progress,
                    observation.result_url,
                    observation.error,
                );
                if changed {
                    tracing::debug!(
                        raw_status = %raw.raw_status,
                        status = %job.canonical_status,
                        progress = job.progress,
                        "Job status updated"
                    );
                }
                on_update(job);
            }
            Err(err) if err.is_transport() => {
                consecutive_transport_errors += 1;
                if consecutive_transport_errors >= config.max_consecutive_transport_errors {
                    tracing::error!(
                        error = %err,
                        consecutive = consecutive_transport_errors,
                        "Giving up after consecutive transport errors"
                    );
                    return Err(err);
                }
                let backoff = Duration::from_secs(compute_transport_backoff_seconds(
                    consecutive_transport_errors,
                ));
                delay = config.interval.max(backoff);
                tracing::warn!(
                    error = %err,
                    consecutive = consecutive_transport_errors,
                    retry_in_secs = delay.as_secs(),
                    "Poll transport error, retrying"
                );
                continue;
            }
            Err(GenflowError::Provider { message, .. }) => {
                job.apply(CanonicalStatus::Failed, job.progress, None, Some(message));
                tracing::warn!(
                    error = job.error.as_deref().unwrap_or_default(),
                    "Provider rejected the job while polling"
                );
                on_update(job);
            }
            Err(err @ GenflowError::Malformed { .. }) => {
                consecutive_transport_errors = 0;
                delay = config.interval;
                tracing::warn!(error = %err, "Unreadable poll response, treating as still processing");
            }
            Err(err) => {
                tracing::error!(error = %err, "Poll cannot proceed");
                return Err(err);
            }
        }

        if job.is_terminal() {
            tracing::info!(
                status = %job.canonical_status,
                elapsed_secs = started.elapsed().as_secs(),
                "Job reached terminal state"
            );
            return Ok(());
        }

        budget_used += config.interval;
        if budget_used >= config.timeout {
            tracing::warn!(
                budget_secs = budget_used.as_secs(),
                last_status = %job.canonical_status,
                "Polling budget exhausted"
            );
            return Err(GenflowError::Timeout {
                elapsed_secs: budget_used.as_secs(),
                last_status: job.canonical_status,
            });
        }
    }
}

/// Outcome a waiting caller sees: the job when it completed, the provider's error
/// message verbatim when it failed.
pub fn terminal_result(job: &Job) -> GenflowResult<Job> {
    match job.canonical_status {
        CanonicalStatus::Completed => Ok(job.clone()),
        CanonicalStatus::Failed => Err(GenflowError::provider(
            job.provider.clone(),
            job.error
                .clone()
                .unwrap_or_else(|| "generation failed".to_string()),
        )),
        status => Err(GenflowError::Internal(format!(
            "job {} is not terminal (status: {})",
            job.id, status
        ))),
    }
}
