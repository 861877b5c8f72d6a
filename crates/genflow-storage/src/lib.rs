//! genflow staging storage
//!
//! Object storage used to re-host input assets so providers can fetch them from a
//! durable public URL. Backends implement [`Storage`]; [`create_storage`] picks one
//! from configuration.
//!
//! # Storage key format
//!
//! - **Unscoped assets**: `staging/{yyyymmdd}/{millis}_{random}.{ext}`
//! - **Resource-scoped assets**: `projects/{resource_id}/inputs/{millis}_{random}.{ext}`
//!
//! Keys must not contain `..` or a leading `/`. Key generation lives in the `keys`
//! module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use genflow_core::StorageBackend;
pub use keys::{extension_for_mime, staging_key};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
