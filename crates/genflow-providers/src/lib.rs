//! genflow provider layer
//!
//! Everything between a validated request and a provider's HTTP API:
//!
//! - [`staging`]: re-hosts input assets on durable storage
//! - [`adapter`]: the [`ProviderAdapter`] contract, with concrete adapters in [`adapters`]
//! - [`signing`]: canonical-request HMAC signing for providers that need it
//! - [`status`]: raw status vocabularies and the canonical normalizer
//! - [`strategy`]: ordered endpoint and envelope fallbacks used while polling
//! - [`fallback`]: secondary-provider retry on submit

pub mod adapter;
#[cfg(feature = "adapter")]
pub mod adapters;
pub mod fallback;
pub mod http;
pub mod params;
pub mod registry;
pub mod signing;
pub mod staging;
pub mod status;
pub mod strategy;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use adapter::{AdapterInfo, AuthScheme, PollResult, ProviderAdapter, SubmitInput, SubmitResult};
#[cfg(feature = "adapter")]
pub use adapters::build_registry;
pub use fallback::{FallbackChain, FallbackOutcome};
pub use params::{ParamRule, ParamSpec};
pub use registry::AdapterRegistry;
pub use signing::{RequestParts, SignedHeaders, SigningContext};
pub use staging::{RetryPolicy, Stager};
pub use status::{normalize, Observation, StatusVocabulary};
