use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::recovery::RecoveryStrategy;

/// A candidate content item produced by an upstream fetcher.
///
/// Immutable once created; the classification core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub source: String,
    /// Precomputed embedding, if the fetcher supplied one. Fixed
    /// dimensionality across a batch (e.g. 1536 floats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl ContentItem {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        published_at: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            published_at,
            source: source.into(),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Title and body joined, the text both lexical metrics and embeddings
    /// are computed over.
    pub fn comparison_text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}

/// Read handle over previously classified items, restricted to a trailing
/// time window. The core only queries it; eviction and persistence belong to
/// the owning collaborator.
#[derive(Debug, Clone, Default)]
pub struct PastItemIndex {
    items: Vec<ContentItem>,
    window_days: i64,
}

impl PastItemIndex {
    pub fn new(window_days: i64) -> Self {
        Self {
            items: Vec::new(),
            window_days: window_days.max(1),
        }
    }

    /// Append an already-classified item. Caller-side maintenance; the
    /// classification core never calls this.
    pub fn push(&mut self, item: ContentItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items inside the trailing window relative to `now`, cloned into an
    /// owned snapshot. Batches take one snapshot at start; concurrent
    /// appends by the owner are invisible to an in-flight batch.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<ContentItem> {
        let cutoff = now - Duration::days(self.window_days);
        self.items
            .iter()
            .filter(|item| item.published_at >= cutoff)
            .cloned()
            .collect()
    }
}

// ─── Decisions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Skip,
    Update,
    Keep,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Update => "update",
            Self::Keep => "keep",
        }
    }
}

/// What kind of continuation an UPDATE represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Progress,
    Expansion,
    Correction,
    FollowUp,
}

/// How much a downstream consumer should trust a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityTier {
    High,
    Moderate,
    Low,
}

impl ReliabilityTier {
    /// Tier implied by a confidence score.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.7 {
            Self::High
        } else if confidence > 0.3 {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

/// Final classification for one item.
///
/// Invariants enforced by the arbiter: an `Update` always carries a
/// non-empty `contextual_summary` and at least one reference; `confidence`
/// is always in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationDecision {
    pub decision: Decision,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contextual_summary: Option<Vec<String>>,
    /// Identifiers of past items this decision refers to.
    #[serde(default)]
    pub references: Vec<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_kind: Option<UpdateKind>,
    pub reliability: ReliabilityTier,
    /// Provider that produced the judgment, if one was called.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ClassificationDecision {
    /// The documented safe default: never lose an item to a failure.
    pub fn keep_default(reasoning: impl Into<String>, confidence: f64) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            decision: Decision::Keep,
            reasoning: reasoning.into(),
            contextual_summary: None,
            references: Vec::new(),
            confidence,
            update_kind: None,
            reliability: ReliabilityTier::from_confidence(confidence),
            provider: None,
        }
    }
}

/// Structured summary for one item.
///
/// Invariant: 1-6 bullets, each at least 30 characters after trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResult {
    pub bullets: Vec<String>,
    pub confidence: f64,
    pub reliability: ReliabilityTier,
    /// Provider that produced the summary, or `None` for the synthesized
    /// exhaustion fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Recovery strategy that decoded the provider response, absent when
    /// the result was synthesized locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RecoveryStrategy>,
    /// True when the router exhausted every provider and the summary was
    /// built from the original input instead.
    #[serde(default)]
    pub synthesized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn snapshot_filters_trailing_window() {
        let mut index = PastItemIndex::new(7);
        index.push(ContentItem::new("old", "t", "b", at(2026, 8, 1), "rss"));
        index.push(ContentItem::new("recent", "t", "b", at(2026, 8, 25), "rss"));

        let snapshot = index.snapshot(at(2026, 8, 28));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "recent");
    }

    #[test]
    fn keep_default_clamps_confidence() {
        let decision = ClassificationDecision::keep_default("fallback", 3.0);
        assert_eq!(decision.decision, Decision::Keep);
        assert!((decision.confidence - 1.0).abs() < f64::EPSILON);
        assert!(decision.references.is_empty());
    }

    #[test]
    fn reliability_tier_from_confidence() {
        assert_eq!(ReliabilityTier::from_confidence(0.9), ReliabilityTier::High);
        assert_eq!(
            ReliabilityTier::from_confidence(0.5),
            ReliabilityTier::Moderate
        );
        assert_eq!(ReliabilityTier::from_confidence(0.3), ReliabilityTier::Low);
        assert_eq!(ReliabilityTier::from_confidence(0.0), ReliabilityTier::Low);
    }

    #[test]
    fn decision_serde_uses_lowercase() {
        let json = serde_json::to_string(&Decision::Update).unwrap();
        assert_eq!(json, "\"update\"");
        let parsed: Decision = serde_json::from_str("\"skip\"").unwrap();
        assert_eq!(parsed, Decision::Skip);
    }

    #[test]
    fn update_kind_serde_uses_snake_case() {
        let parsed: UpdateKind = serde_json::from_str("\"follow_up\"").unwrap();
        assert_eq!(parsed, UpdateKind::FollowUp);
    }
}
