use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use validator::Validate;

/// Named provider options (resolution, duration, aspect_ratio, seed, ...)
pub type Parameters = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            _ => Err(anyhow::anyhow!("Invalid media kind: {}", s)),
        }
    }
}

/// Input asset as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceAsset {
    /// Externally hosted file
    Url { url: String },
    /// `data:<mime>;base64,<payload>`
    DataUri { data_uri: String },
    /// Raw bytes with a declared MIME type
    Bytes { bytes: Vec<u8>, mime: String },
}

impl SourceAsset {
    pub fn url(url: impl Into<String>) -> Self {
        SourceAsset::Url { url: url.into() }
    }

    /// Short, log-safe description (never the payload itself)
    pub fn describe(&self) -> String {
        match self {
            SourceAsset::Url { url } => url.clone(),
            SourceAsset::DataUri { data_uri } => {
                let header = data_uri.split(',').next().unwrap_or_default();
                format!("inline {} ({} chars)", header, data_uri.len())
            }
            SourceAsset::Bytes { bytes, mime } => format!("inline {} ({} bytes)", mime, bytes.len()),
        }
    }
}

/// A caller's request for one generated image or video
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GenerationRequest {
    pub media_kind: MediaKind,
    /// Provider or model id used to look up the adapter
    #[validate(length(min = 1, max = 128, message = "Provider hint must not be empty"))]
    pub provider_hint: String,
    #[serde(default)]
    pub source_asset: Option<SourceAsset>,
    #[serde(default)]
    #[validate(length(max = 4000, message = "Prompt must be at most 4000 characters"))]
    pub prompt: String,
    #[serde(default)]
    pub parameters: Parameters,
    /// Owning project or resource; scopes staging keys and the submission lock
    #[serde(default)]
    pub resource_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(media_kind: MediaKind, provider_hint: impl Into<String>) -> Self {
        Self {
            media_kind,
            provider_hint: provider_hint.into(),
            source_asset: None,
            prompt: String::new(),
            parameters: Parameters::new(),
            resource_id: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_source(mut self, asset: SourceAsset) -> Self {
        self.source_asset = Some(asset);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}
