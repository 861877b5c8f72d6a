pub mod asset;
pub mod job;
pub mod request;

pub use asset::StagedAsset;
pub use job::{CanonicalStatus, Job, JobStatusView, SubmitResponse};
pub use request::{GenerationRequest, MediaKind, Parameters, SourceAsset};
