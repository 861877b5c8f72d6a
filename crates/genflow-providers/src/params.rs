//! Per-provider parameter allow-lists
//!
//! Parameters are checked before any network call. Unknown names and out-of-range
//! values fail with a validation error naming the parameter.

use serde_json::Value;

use genflow_core::models::Parameters;
use genflow_core::{GenflowError, GenflowResult};

#[derive(Debug, Clone)]
pub enum ParamRule {
    /// String from a fixed set (exact match)
    OneOf(&'static [&'static str]),
    /// Integer within an inclusive range
    IntRange { min: i64, max: i64 },
    /// Integer from a fixed set
    IntOneOf(&'static [i64]),
    Bool,
    /// Free text up to a maximum length
    Text { max_len: usize },
}

impl ParamRule {
    fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            ParamRule::OneOf(allowed) => match value.as_str() {
                Some(s) if allowed.contains(&s) => Ok(()),
                _ => Err(format!("must be one of {}", allowed.join(", "))),
            },
            ParamRule::IntRange { min, max } => match value.as_i64() {
                Some(n) if (*min..=*max).contains(&n) => Ok(()),
                _ => Err(format!("must be an integer between {} and {}", min, max)),
            },
            ParamRule::IntOneOf(allowed) => match value.as_i64() {
                Some(n) if allowed.contains(&n) => Ok(()),
                _ => Err(format!(
                    "must be one of {}",
                    allowed
                        .iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            },
            ParamRule::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err("must be true or false".to_string())
                }
            }
            ParamRule::Text { max_len } => match value.as_str() {
                Some(s) if s.chars().count() <= *max_len => Ok(()),
                _ => Err(format!("must be text of at most {} characters", max_len)),
            },
        }
    }
}

/// The parameters one provider accepts
#[derive(Debug, Clone, Default)]
pub struct ParamSpec {
    rules: Vec<(&'static str, ParamRule)>,
}

impl ParamSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, name: &'static str, rule: ParamRule) -> Self {
        self.rules.push((name, rule));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|(name, _)| *name)
    }

    pub fn validate(&self, provider: &str, params: &Parameters) -> GenflowResult<()> {
        for (name, value) in params {
            let rule = self
                .rules
                .iter()
                .find(|(allowed, _)| allowed == name)
                .map(|(_, rule)| rule)
                .ok_or_else(|| {
                    GenflowError::validation(provider, format!("unsupported parameter '{}'", name))
                })?;

            rule.check(value).map_err(|reason| {
                GenflowError::validation(provider, format!("parameter '{}' {}", name, reason))
            })?;
        }
        Ok(())
    }
}

pub fn str_param<'a>(params: &'a Parameters, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

pub fn int_param(params: &Parameters, name: &str) -> Option<i64> {
    params.get(name).and_then(Value::as_i64)
}

pub fn bool_param(params: &Parameters, name: &str) -> Option<bool> {
    params.get(name).and_then(Value::as_bool)
}
