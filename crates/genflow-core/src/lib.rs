//! genflow core library
//!
//! Domain models, the error taxonomy and configuration shared by the staging,
//! provider, orchestration and CLI crates.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{Config, PollingSettings, ProviderCredentials, StorageBackend, StorageConfig};
pub use error::{ErrorMetadata, GenflowError, GenflowResult, LogLevel};
