//! Status normalization
//!
//! Maps a provider's raw poll observation onto the canonical four-state model.
//! Raw-status synonyms are data ([`StatusVocabulary`]), one per adapter, so a provider
//! renaming a state is a vocabulary change rather than a new branch.
//!
//! Classification:
//! - completed word **and** a non-empty result URL: `Completed`
//! - failed word: `Failed` (unless the message is a known capacity hiccup)
//! - queue word: `Pending`
//! - anything else, including completed without a URL: `Processing`

use std::time::Duration;

use genflow_core::models::CanonicalStatus;

use crate::adapter::PollResult;

/// Progress band for jobs still waiting in a provider queue
const QUEUED_BAND: (u8, u8) = (0, 10);
/// Progress band for jobs the provider reports as running
const RUNNING_BAND: (u8, u8) = (10, 95);
const MAX_IN_FLIGHT_PROGRESS: u8 = 99;

/// Raw status words recognized for one provider (exact, case-sensitive matches)
#[derive(Debug, Clone)]
pub struct StatusVocabulary {
    completed: Vec<String>,
    failed: Vec<String>,
    queued: Vec<String>,
    /// Error fragments meaning "no capacity right now", treated as still in flight
    transient_errors: Vec<String>,
}

impl Default for StatusVocabulary {
    fn default() -> Self {
        Self {
            completed: to_strings(&["succeeded", "success", "completed", "Ready", "SUCCESS"]),
            failed: to_strings(&["failed", "error", "FAILED", "Error"]),
            queued: to_strings(&["queued", "pending", "created", "submitted"]),
            transient_errors: to_strings(&[
                "no model instance",
                "No available models",
                "no available instance",
            ]),
        }
    }
}

fn to_strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl StatusVocabulary {
    pub fn with_completed(mut self, words: &[&str]) -> Self {
        self.completed.extend(to_strings(words));
        self
    }

    pub fn with_failed(mut self, words: &[&str]) -> Self {
        self.failed.extend(to_strings(words));
        self
    }

    pub fn with_queued(mut self, words: &[&str]) -> Self {
        self.queued.extend(to_strings(words));
        self
    }

    pub fn with_transient_errors(mut self, fragments: &[&str]) -> Self {
        self.transient_errors.extend(to_strings(fragments));
        self
    }

    fn is_transient(&self, message: Option<&str>) -> bool {
        let Some(message) = message else {
            return false;
        };
        let lowered = message.to_lowercase();
        self.transient_errors
            .iter()
            .any(|fragment| lowered.contains(&fragment.to_lowercase()))
    }

    pub fn classify(&self, poll: &PollResult) -> CanonicalStatus {
        let raw = poll.raw_status.trim();
        let has_url = poll
            .result_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty());

        if self.completed.iter().any(|w| w == raw) {
            if has_url {
                CanonicalStatus::Completed
            } else {
                CanonicalStatus::Processing
            }
        } else if self.failed.iter().any(|w| w == raw) {
            if self.is_transient(poll.error_message.as_deref()) {
                CanonicalStatus::Processing
            } else {
                CanonicalStatus::Failed
            }
        } else if self.queued.iter().any(|w| w == raw) {
            CanonicalStatus::Pending
        } else {
            CanonicalStatus::Processing
        }
    }
}

/// One normalized observation, ready to apply to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub status: CanonicalStatus,
    pub progress: u8,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

/// Normalize a raw poll result.
///
/// Pure: the same payload with the same elapsed time always yields the same
/// observation. `expected` is the typical run time used to estimate progress when
/// the provider reports none.
pub fn normalize(
    vocabulary: &StatusVocabulary,
    poll: &PollResult,
    elapsed: Duration,
    expected: Duration,
) -> Observation {
    let status = vocabulary.classify(poll);

    let progress = match status {
        CanonicalStatus::Completed => 100,
        CanonicalStatus::Failed => poll.progress.unwrap_or(0).min(MAX_IN_FLIGHT_PROGRESS),
        CanonicalStatus::Pending | CanonicalStatus::Processing => match poll.progress {
            Some(reported) => reported.min(MAX_IN_FLIGHT_PROGRESS),
            None => estimate_progress(status, elapsed, expected),
        },
    };

    let error = match status {
        CanonicalStatus::Failed => Some(
            poll.error_message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("provider reported status '{}'", poll.raw_status)),
        ),
        _ => None,
    };

    Observation {
        status,
        progress,
        result_url: match status {
            CanonicalStatus::Completed => poll.result_url.clone(),
            _ => None,
        },
        error,
    }
}

/// Elapsed-time estimate within the band of the status class, clamped to [0, 99]
pub fn estimate_progress(status: CanonicalStatus, elapsed: Duration, expected: Duration) -> u8 {
    let (low, high) = match status {
        CanonicalStatus::Pending => QUEUED_BAND,
        CanonicalStatus::Processing => RUNNING_BAND,
        CanonicalStatus::Completed => return 100,
        CanonicalStatus::Failed => return 0,
    };

    let fraction = if expected.is_zero() {
        1.0
    } else {
        (elapsed.as_secs_f64() / expected.as_secs_f64()).min(1.0)
    };
    let value = low as f64 + (high - low) as f64 * fraction;
    (value.floor() as u8).min(MAX_IN_FLIGHT_PROGRESS)
}
