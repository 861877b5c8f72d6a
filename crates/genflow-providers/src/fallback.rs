//! Provider fallback on submit
//!
//! A primary adapter may name one secondary. The secondary is tried only when the
//! primary's submit failed in a way another provider could plausibly not share:
//! a transport failure, or a provider error saying the model is unavailable. Content
//! and parameter rejections are returned as-is. Chains are one level deep.

use anyhow::Context;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use genflow_core::{GenflowError, GenflowResult};

use crate::adapter::{ProviderAdapter, SubmitInput, SubmitResult};
use crate::registry::AdapterRegistry;

const MODEL_UNAVAILABLE_PATTERN: &str = r"(?i)(model[ _]?not[ _]?found|modelnotopen|invalidendpointormodel|does not exist|not activated|no available models)";

/// Successful submission, tagged with the provider that accepted it
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub provider: String,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub result: SubmitResult,
    /// True when the secondary served the request
    pub fell_back: bool,
}

#[derive(Clone)]
pub struct FallbackChain {
    registry: AdapterRegistry,
    secondaries: HashMap<String, String>,
    unavailable: Regex,
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackChain")
            .field("secondaries", &self.secondaries)
            .finish_non_exhaustive()
    }
}

impl FallbackChain {
    pub fn new(
        registry: AdapterRegistry,
        pairs: impl IntoIterator<Item = (String, String)>,
    ) -> anyhow::Result<Self> {
        let unavailable = Regex::new(MODEL_UNAVAILABLE_PATTERN)
            .context("Failed to compile model-unavailable regex")?;

        Ok(Self {
            registry,
            secondaries: pairs.into_iter().collect(),
            unavailable,
        })
    }

    pub fn secondary_for(&self, primary: &str) -> Option<&str> {
        self.secondaries.get(primary).map(String::as_str)
    }

    /// Whether `err` from a primary submit warrants trying the secondary
    pub fn should_fall_back(&self, err: &GenflowError) -> bool {
        match err {
            GenflowError::Transport { .. } => true,
            GenflowError::Provider { message, .. } => self.unavailable.is_match(message),
            _ => false,
        }
    }

    /// Submit through `primary`, falling back to its configured secondary if needed.
    ///
    /// When the secondary also fails, or cannot take these parameters, the primary's
    /// error is returned since it is the one the caller asked about.
    pub async fn submit(
        &self,
        primary: Arc<dyn ProviderAdapter>,
        input: SubmitInput<'_>,
    ) -> GenflowResult<FallbackOutcome> {
        let primary_err = match primary.submit(input).await {
            Ok(result) => {
                return Ok(FallbackOutcome {
                    provider: primary.name().to_string(),
                    adapter: primary,
                    result,
                    fell_back: false,
                })
            }
            Err(err) => err,
        };

        let Some(secondary_name) = self.secondary_for(primary.name()) else {
            return Err(primary_err);
        };
        if !self.should_fall_back(&primary_err) {
            tracing::debug!(
                provider = %primary.name(),
                error = %primary_err,
                "Submit error is not eligible for fallback"
            );
            return Err(primary_err);
        }

        let secondary = match self.registry.get(secondary_name).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::warn!(
                    provider = %primary.name(),
                    secondary = %secondary_name,
                    error = %e,
                    "Fallback provider is not registered"
                );
                return Err(primary_err);
            }
        };

        if let Err(e) = secondary.validate_params(input.params) {
            tracing::warn!(
                provider = %primary.name(),
                secondary = %secondary_name,
                error = %e,
                "Fallback provider rejects the request parameters"
            );
            return Err(primary_err);
        }
        if secondary.info().requires_source && input.source.is_none() {
            return Err(primary_err);
        }

        tracing::warn!(
            provider = %primary.name(),
            secondary = %secondary_name,
            error = %primary_err,
            "Primary provider submit failed, falling back"
        );

        match secondary.submit(input).await {
            Ok(result) => Ok(FallbackOutcome {
                provider: secondary.name().to_string(),
                adapter: secondary,
                result,
                fell_back: true,
            }),
            Err(secondary_err) => {
                tracing::warn!(
                    provider = %primary.name(),
                    secondary = %secondary_name,
                    error = %secondary_err,
                    "Fallback provider submit failed as well"
                );
                Err(primary_err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockAdapter;
    use genflow_core::models::Parameters;

    async fn chain(primary: MockAdapter, secondary: MockAdapter) -> (FallbackChain, Arc<MockAdapter>, Arc<MockAdapter>) {
        let registry = AdapterRegistry::new();
        let primary = Arc::new(primary);
        let secondary = Arc::new(secondary);
        registry.register(primary.clone()).await;
        registry.register(secondary.clone()).await;

        let chain = FallbackChain::new(
            registry,
            vec![("A".to_string(), "B".to_string())],
        )
        .unwrap();
        (chain, primary, secondary)
    }

    fn input(params: &Parameters) -> SubmitInput<'_> {
        SubmitInput {
            prompt: "a lighthouse at dusk",
            source: None,
            params,
        }
    }

    #[tokio::test]
    async fn transport_failure_falls_back_and_tags_secondary() {
        let (chain, primary, secondary) = chain(
            MockAdapter::new("A").with_submit_error(GenflowError::transport("connection refused")),
            MockAdapter::new("B"),
        )
        .await;
        let params = Parameters::new();

        let outcome = chain.submit(primary.clone(), input(&params)).await.unwrap();

        assert_eq!(outcome.provider, "B");
        assert!(outcome.fell_back);
        assert_eq!(outcome.adapter.name(), "B");
        assert_eq!(primary.submit_count(), 1);
        assert_eq!(secondary.submit_count(), 1);
    }

    #[tokio::test]
    async fn model_unavailable_falls_back() {
        let (chain, primary, _) = chain(
            MockAdapter::new("A").with_submit_error(GenflowError::provider(
                "A",
                "InvalidEndpointOrModel.NotFound: The model or endpoint does not exist",
            )),
            MockAdapter::new("B"),
        )
        .await;
        let params = Parameters::new();

        let outcome = chain.submit(primary, input(&params)).await.unwrap();
        assert_eq!(outcome.provider, "B");
    }

    #[tokio::test]
    async fn content_rejection_is_not_retried_elsewhere() {
        let (chain, primary, secondary) = chain(
            MockAdapter::new("A").with_submit_error(GenflowError::provider(
                "A",
                "The input image may contain sensitive content",
            )),
            MockAdapter::new("B"),
        )
        .await;
        let params = Parameters::new();

        let err = chain.submit(primary, input(&params)).await.unwrap_err();
        assert_eq!(
            err.provider_message(),
            Some("The input image may contain sensitive content")
        );
        assert_eq!(secondary.submit_count(), 0);
    }

    #[tokio::test]
    async fn secondary_failure_surfaces_primary_error() {
        let (chain, primary, _) = chain(
            MockAdapter::new("A").with_submit_error(GenflowError::transport("connection refused")),
            MockAdapter::new("B").with_submit_error(GenflowError::provider("B", "quota exceeded")),
        )
        .await;
        let params = Parameters::new();

        let err = chain.submit(primary, input(&params)).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn primary_success_never_touches_secondary() {
        let (chain, primary, secondary) =
            chain(MockAdapter::new("A"), MockAdapter::new("B")).await;
        let params = Parameters::new();

        let outcome = chain.submit(primary, input(&params)).await.unwrap();
        assert_eq!(outcome.provider, "A");
        assert!(!outcome.fell_back);
        assert_eq!(secondary.submit_count(), 0);
    }

    #[test]
    fn unavailable_pattern_matches_known_messages() {
        let chain = FallbackChain::new(AdapterRegistry::new(), Vec::new()).unwrap();
        for message in [
            "model not found",
            "ModelNotOpen: Your account has not activated the model",
            "InvalidEndpointOrModel.NotFound",
            "The model doubao-x does not exist",
            "No available models",
        ] {
            assert!(
                chain.should_fall_back(&GenflowError::provider("A", message)),
                "{} should trigger fallback",
                message
            );
        }
        assert!(!chain.should_fall_back(&GenflowError::validation("A", "model not found")));
        assert!(!chain.should_fall_back(&GenflowError::provider("A", "prompt rejected")));
    }
}
