use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level pipeline configuration.
///
/// Every threshold the screener, classifier and arbiter use lives here as a
/// named field with a serde default, so call sites never re-derive them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub screening: ScreeningConfig,

    #[serde(default)]
    pub arbiter: ArbiterConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

impl PipelineConfig {
    /// Load a TOML config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Validation(format!(
                    "{name} must be in [0, 1], got {v}"
                )))
            }
        };
        unit("screening.jaccard_floor", f64::from(self.screening.jaccard_floor))?;
        unit("screening.sequence_floor", f64::from(self.screening.sequence_floor))?;
        unit(
            "screening.duplicate_threshold",
            f64::from(self.screening.duplicate_threshold),
        )?;
        unit("arbiter.relevance_floor", f64::from(self.arbiter.relevance_floor))?;
        unit("arbiter.low_confidence_floor", self.arbiter.low_confidence_floor)?;
        unit(
            "arbiter.lexical_agreement_floor",
            f64::from(self.arbiter.lexical_agreement_floor),
        )?;

        if self.screening.shortlist_cap == 0 {
            return Err(ConfigError::Validation(
                "screening.shortlist_cap must be at least 1".into(),
            ));
        }
        if self.screening.rank_top_k == 0 {
            return Err(ConfigError::Validation(
                "screening.rank_top_k must be at least 1".into(),
            ));
        }
        if self.concurrency.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "concurrency.max_in_flight must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ─── Reliability ────────────────────────────────────────────────────────────

/// Retry/backoff policy for the provider router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Extra attempts granted to the primary provider beyond its first try.
    /// Fallback providers always get exactly one attempt each.
    #[serde(default = "default_provider_retries")]
    pub provider_retries: u32,

    #[serde(default = "default_provider_backoff_ms")]
    pub provider_backoff_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            provider_retries: default_provider_retries(),
            provider_backoff_ms: default_provider_backoff_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

fn default_provider_retries() -> u32 {
    2
}

fn default_provider_backoff_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    10_000
}

// ─── Screening / similarity ─────────────────────────────────────────────────

/// Thresholds for the lexical screener and the embedding classifier.
///
/// The lexical floors (0.7) are intentionally loose — screening over-includes
/// by design. The embedding `duplicate_threshold` (0.85) is the strict final
/// bar used by the fast-path duplicate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningConfig {
    #[serde(default = "default_lexical_floor")]
    pub jaccard_floor: f32,

    #[serde(default = "default_lexical_floor")]
    pub sequence_floor: f32,

    /// Shortlist cap (top-N by combined lexical score).
    #[serde(default = "default_shortlist_cap")]
    pub shortlist_cap: usize,

    /// Embedding similarity above which an item is likely a duplicate.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,

    /// How many ranked candidates are passed to the arbiter (top-K).
    #[serde(default = "default_rank_top_k")]
    pub rank_top_k: usize,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            jaccard_floor: default_lexical_floor(),
            sequence_floor: default_lexical_floor(),
            shortlist_cap: default_shortlist_cap(),
            duplicate_threshold: default_duplicate_threshold(),
            rank_top_k: default_rank_top_k(),
        }
    }
}

fn default_lexical_floor() -> f32 {
    0.7
}

fn default_shortlist_cap() -> usize {
    10
}

fn default_duplicate_threshold() -> f32 {
    0.85
}

fn default_rank_top_k() -> usize {
    4
}

// ─── Arbiter ────────────────────────────────────────────────────────────────

/// Decision policy for the context arbiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    /// Minimum embedding similarity for a candidate to be worth a provider
    /// call. Below this for every candidate, the arbiter keeps the item
    /// without calling out.
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,

    /// Provider confidence below which a SKIP/UPDATE is distrusted and the
    /// arbiter resolves to KEEP.
    #[serde(default = "default_low_confidence_floor")]
    pub low_confidence_floor: f64,

    /// Combined lexical score the screener must report before the fast-path
    /// SKIP (embedding similarity above `duplicate_threshold`) is allowed to
    /// short-circuit the provider call.
    #[serde(default = "default_lexical_agreement_floor")]
    pub lexical_agreement_floor: f32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            relevance_floor: default_relevance_floor(),
            low_confidence_floor: default_low_confidence_floor(),
            lexical_agreement_floor: default_lexical_agreement_floor(),
        }
    }
}

fn default_relevance_floor() -> f32 {
    0.35
}

fn default_low_confidence_floor() -> f64 {
    0.4
}

fn default_lexical_agreement_floor() -> f32 {
    0.75
}

// ─── Concurrency ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Bounded pool size for in-flight items during a batch.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_max_in_flight() -> usize {
    6
}
