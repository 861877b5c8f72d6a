use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::MediaKind;

/// Provider-independent job state.
///
/// `Pending -> Processing -> {Completed, Failed}`. Terminal states never transition out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CanonicalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CanonicalStatus::Completed | CanonicalStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            CanonicalStatus::Pending => 0,
            CanonicalStatus::Processing => 1,
            CanonicalStatus::Completed | CanonicalStatus::Failed => 2,
        }
    }
}

impl Display for CanonicalStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CanonicalStatus::Pending => write!(f, "pending"),
            CanonicalStatus::Processing => write!(f, "processing"),
            CanonicalStatus::Completed => write!(f, "completed"),
            CanonicalStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for CanonicalStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CanonicalStatus::Pending),
            "processing" => Ok(CanonicalStatus::Processing),
            "completed" => Ok(CanonicalStatus::Completed),
            "failed" => Ok(CanonicalStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid canonical status: {}", s)),
        }
    }
}

/// The orchestrator's record of one generation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    /// Adapter that actually accepted the submission (after any fallback)
    pub provider: String,
    /// Opaque id issued by the provider; never interpreted
    pub provider_task_id: String,
    pub media_kind: MediaKind,
    pub canonical_status: CanonicalStatus,
    pub progress: u8,
    pub result_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        provider: impl Into<String>,
        provider_task_id: impl Into<String>,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            provider_task_id: provider_task_id.into(),
            media_kind,
            canonical_status: CanonicalStatus::Pending,
            progress: 0,
            result_url: None,
            error: None,
            created_at: Utc::now(),
            last_polled_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.canonical_status.is_terminal()
    }

    /// Apply one normalized observation.
    ///
    /// Keeps the job monotonic: terminal jobs are frozen, status never moves back
    /// (a late "queued" after "running" stays Processing), progress never decreases
    /// and only reaches 100 on completion. Returns whether anything visible changed.
    pub fn apply(
        &mut self,
        status: CanonicalStatus,
        progress: u8,
        result_url: Option<String>,
        error: Option<String>,
    ) -> bool {
        self.last_polled_at = Some(Utc::now());

        if self.is_terminal() {
            return false;
        }

        let before = (self.canonical_status, self.progress);

        if status.rank() > self.canonical_status.rank() {
            self.canonical_status = status;
        }

        match self.canonical_status {
            CanonicalStatus::Completed => {
                self.progress = 100;
                if result_url.is_some() {
                    self.result_url = result_url;
                }
            }
            CanonicalStatus::Failed => {
                self.error = error.or_else(|| Some("generation failed".to_string()));
            }
            _ => {
                self.progress = self.progress.max(progress.min(99));
            }
        }

        before != (self.canonical_status, self.progress)
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            status: self.canonical_status,
            progress: self.progress,
            result_url: self.result_url.clone(),
            error: self.error.clone(),
        }
    }
}

/// Read-only snapshot returned by `get_status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStatusView {
    pub status: CanonicalStatus,
    pub progress: u8,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

/// Returned by `submit`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub provider: String,
    pub status: CanonicalStatus,
}
