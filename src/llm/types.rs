use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::recovery::RecoveryStrategy;

/// Where a provider sits in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    Primary,
    Fallback,
}

/// Per-call resource budget for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallBudget {
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl CallBudget {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_temperature() -> f64 {
    0.2
}

/// One entry in the fallback chain.
///
/// The credential is an opaque handle; the core only checks presence and
/// basic shape before any network call, never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Provider name understood by the registry ("anthropic", "openai",
    /// "openrouter", "groq", ..., or "custom:<base_url>").
    pub name: String,

    pub role: ProviderRole,

    pub budget: CallBudget,

    /// Explicit API key; when absent the registry resolves one from the
    /// provider's environment variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Flat cost proxy used by telemetry's character-length estimate.
    #[serde(default = "default_usd_per_1k_tokens")]
    pub usd_per_1k_tokens: f64,
}

impl ProviderSpec {
    pub fn primary(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_role(name, model, ProviderRole::Primary)
    }

    pub fn fallback(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_role(name, model, ProviderRole::Fallback)
    }

    fn with_role(name: impl Into<String>, model: impl Into<String>, role: ProviderRole) -> Self {
        Self {
            name: name.into(),
            role,
            budget: CallBudget::new(model),
            api_key: None,
            usd_per_1k_tokens: default_usd_per_1k_tokens(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

fn default_usd_per_1k_tokens() -> f64 {
    0.002
}

/// Outcome of a single provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Response arrived but could not be structurally recovered or failed
    /// schema validation.
    Malformed,
    ProviderError,
    Timeout,
}

/// Telemetry for one provider attempt inside a routed call.
#[derive(Debug, Clone)]
pub struct InvocationAttempt {
    pub provider: String,
    /// 1-based attempt number across the whole chain.
    pub attempt: u32,
    pub duration: Duration,
    pub outcome: AttemptOutcome,
    /// Recovery strategy on success.
    pub strategy: Option<RecoveryStrategy>,
    /// Length of the raw response, zero when the call itself failed.
    pub response_chars: usize,
    /// Leading slice of the raw response text, `None` when the call itself
    /// failed before producing any.
    pub response_excerpt: Option<String>,
}

const RESPONSE_EXCERPT_CHARS: usize = 400;

/// Bounded copy of a raw response for attempt telemetry.
pub(crate) fn response_excerpt(raw: &str) -> String {
    match raw.char_indices().nth(RESPONSE_EXCERPT_CHARS) {
        Some((idx, _)) => raw[..idx].to_string(),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_constructors_set_role() {
        let primary = ProviderSpec::primary("anthropic", "claude-sonnet-4-5");
        assert_eq!(primary.role, ProviderRole::Primary);
        let fallback = ProviderSpec::fallback("openai", "gpt-4o-mini");
        assert_eq!(fallback.role, ProviderRole::Fallback);
        assert!(fallback.api_key.is_none());
    }

    #[test]
    fn budget_defaults() {
        let budget = CallBudget::new("gpt-4o-mini");
        assert_eq!(budget.timeout(), Duration::from_secs(60));
        assert_eq!(budget.max_output_tokens, 1024);
        assert!(budget.temperature < 1.0);
    }

    #[test]
    fn excerpt_bounds_long_responses_on_char_boundaries() {
        let short = "a short response";
        assert_eq!(response_excerpt(short), short);

        let long = "é".repeat(500);
        let excerpt = response_excerpt(&long);
        assert_eq!(excerpt.chars().count(), 400);
        assert!(long.starts_with(&excerpt));
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: ProviderSpec = serde_json::from_str(
            r#"{"name": "groq", "role": "fallback", "budget": {"model": "llama-3.3-70b"}}"#,
        )
        .unwrap();
        assert_eq!(spec.budget.timeout_secs, 60);
        assert!(spec.usd_per_1k_tokens > 0.0);
    }
}
