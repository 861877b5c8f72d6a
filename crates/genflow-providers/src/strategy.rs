//! Ordered endpoint and envelope fallbacks for polling
//!
//! Providers have moved their status endpoints and reshaped their response envelopes
//! over time. Adapters list the alternatives in a fixed order and take the first
//! that works.

use serde_json::Value;
use std::fmt::Display;
use std::future::Future;

use genflow_core::{GenflowError, GenflowResult};

use crate::adapter::PollResult;
use crate::http::truncate;

/// Envelope parser: `None` when the body does not have this shape
pub type EnvelopeParser<T = PollResult> = fn(&Value) -> Option<T>;

/// Try each poll strategy in order and return the first success.
///
/// When every strategy fails:
/// - all failures were transport errors: the last one is returned, so the caller's
///   consecutive-error cap still applies to a provider that is simply unreachable
/// - otherwise: a soft `processing` result, since shape mismatches and capacity
///   rejections do not mean the job failed
pub async fn poll_in_order<S, F, Fut>(
    provider: &str,
    strategies: &[S],
    mut attempt: F,
) -> GenflowResult<PollResult>
where
    S: Copy + Display,
    F: FnMut(S) -> Fut,
    Fut: Future<Output = GenflowResult<PollResult>>,
{
    let mut last_transport = None;
    let mut only_transport = true;
    let mut reasons = Vec::with_capacity(strategies.len());

    for &strategy in strategies {
        match attempt(strategy).await {
            Ok(result) => {
                tracing::debug!(
                    provider = %provider,
                    strategy = %strategy,
                    raw_status = %result.raw_status,
                    "Poll strategy succeeded"
                );
                return Ok(result);
            }
            Err(err) => {
                tracing::debug!(
                    provider = %provider,
                    strategy = %strategy,
                    error = %err,
                    "Poll strategy failed"
                );
                reasons.push(format!("{}: {}", strategy, err));
                if err.is_transport() {
                    last_transport = Some(err);
                } else {
                    only_transport = false;
                }
            }
        }
    }

    match last_transport {
        Some(err) if only_transport => Err(err),
        _ => {
            tracing::warn!(
                provider = %provider,
                attempts = reasons.len(),
                "No poll strategy produced a usable response, treating job as still processing"
            );
            Ok(PollResult::soft_processing(reasons.join("; ")))
        }
    }
}

/// Parse `body` with the first envelope parser that recognizes it
pub fn parse_first<T>(
    provider: &str,
    body: &Value,
    parsers: &[(&'static str, EnvelopeParser<T>)],
) -> GenflowResult<T> {
    for (name, parse) in parsers {
        if let Some(result) = parse(body) {
            tracing::trace!(provider = %provider, envelope = %name, "Parsed poll response");
            return Ok(result);
        }
    }

    Err(GenflowError::malformed(
        provider,
        format!("unrecognized response shape: {}", truncate(&body.to_string())),
    ))
}
