//! genflow job orchestration
//!
//! [`JobService`] is the entry point: it submits generation requests through the
//! provider layer and tracks each job with a background polling task
//! ([`orchestrator::run`]). Submissions scoped to a resource are serialized by
//! [`ResourceLocks`].

pub mod locks;
pub mod orchestrator;
pub mod service;

pub use locks::{ResourceGuard, ResourceLocks};
pub use orchestrator::{PollingConfig, MAX_TRANSPORT_BACKOFF_SECS};
pub use service::{JobService, JobState, ServiceOptions};
