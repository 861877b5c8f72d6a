use serde::{Deserialize, Serialize};

/// An input asset re-hosted on durable, publicly fetchable storage.
///
/// Produced once by staging and never mutated afterwards. When staging had to fall
/// back to the caller's original URL, `verified` is false and `byte_size` is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedAsset {
    /// Where the asset came from: the original URL, or a short description of inline data
    pub source_ref: String,
    pub durable_url: String,
    pub verified: bool,
    pub byte_size: Option<u64>,
}

impl StagedAsset {
    /// Asset handed to the provider as-is, without re-hosting
    pub fn passthrough(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            source_ref: url.clone(),
            durable_url: url,
            verified: false,
            byte_size: None,
        }
    }
}
