//! Final SKIP/UPDATE/KEEP judgment.
//!
//! The arbiter composes everything else and carries the asymmetric failure
//! policy: losing a genuinely new item is strictly worse than keeping a
//! near-duplicate, so every failure mode along the path resolves to KEEP.
//! SKIP is reserved for near-exact duplication; UPDATE must arrive with both
//! a contextual summary and references or it is downgraded.

use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::{ArbiterConfig, ScreeningConfig};
use crate::item::{ClassificationDecision, ContentItem, Decision, ReliabilityTier, UpdateKind};
use crate::llm::ProviderRouter;
use crate::recovery::ResponseSchema;
use crate::similarity::{self, RankedCandidate};

const CLASSIFY_SYSTEM_PROMPT: &str = "You are a news deduplication judge. \
Given a current article and a set of similar past articles, decide whether \
the current article should be skipped (near-exact duplicate of a past \
article), treated as an update (new development of a covered story), or \
kept (genuinely new). Respond with a single JSON object with keys: \
\"decision\" (\"skip\" | \"update\" | \"keep\"), \"reasoning\" (string), \
\"contextual_summary\" (array of 3-4 bullet strings, required for update), \
\"references\" (array of past article ids the decision relies on), \
\"confidence\" (number 0-1), and \"update_kind\" (\"progress\" | \
\"expansion\" | \"correction\" | \"follow_up\", required for update).";

/// Raw provider judgment before the arbiter's policy is applied.
#[derive(Debug, Deserialize)]
pub struct RawJudgment {
    pub decision: Decision,
    pub reasoning: String,
    #[serde(default)]
    pub contextual_summary: Option<Vec<String>>,
    #[serde(default)]
    pub references: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub update_kind: Option<UpdateKind>,
}

pub struct JudgmentSchema;

impl ResponseSchema for JudgmentSchema {
    type Output = RawJudgment;

    fn required_keys() -> &'static [&'static str] {
        &["decision", "reasoning", "confidence"]
    }

    fn validate(value: &Value) -> Result<(), String> {
        let decision = value
            .get("decision")
            .and_then(Value::as_str)
            .ok_or("decision must be a string")?;
        if !matches!(decision, "skip" | "update" | "keep") {
            return Err(format!("unknown decision {decision:?}"));
        }
        value
            .get("reasoning")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or("reasoning must be a non-empty string")?;
        let confidence = value
            .get("confidence")
            .and_then(Value::as_f64)
            .ok_or("confidence must be a number")?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(format!("confidence out of range: {confidence}"));
        }
        Ok(())
    }
}

pub struct ContextArbiter {
    router: Arc<ProviderRouter>,
    config: ArbiterConfig,
    screening: ScreeningConfig,
}

impl ContextArbiter {
    pub fn new(
        router: Arc<ProviderRouter>,
        config: ArbiterConfig,
        screening: ScreeningConfig,
    ) -> Self {
        Self {
            router,
            config,
            screening,
        }
    }

    /// Classify `current` against its ranked candidates.
    ///
    /// Never fails: parser and provider failures inside the router resolve to
    /// the KEEP default, and the router owns all retry behavior.
    pub async fn classify(
        &self,
        current: &ContentItem,
        ranked: &[RankedCandidate],
        max_retries_primary: u32,
    ) -> ClassificationDecision {
        let best = ranked.first();
        let max_similarity = best.map(|c| c.similarity).unwrap_or(0.0);

        // Cheap exit: nothing in the window is even topically close.
        if max_similarity < self.config.relevance_floor {
            tracing::debug!(
                item = current.id.as_str(),
                max_similarity,
                "No candidate above relevance floor, keeping without provider call"
            );
            return ClassificationDecision::keep_default(
                "No sufficiently related past items in the window",
                0.9,
            );
        }

        // Fast path: embedding similarity says duplicate and the lexical
        // screener strongly agrees. An optimization only; mid-range
        // similarity always goes to the provider.
        if let Some(best) = best
            && similarity::is_likely_duplicate(
                best.similarity,
                self.screening.duplicate_threshold,
            )
            && best.lexical().combined() >= self.config.lexical_agreement_floor
        {
            tracing::info!(
                item = current.id.as_str(),
                duplicate_of = best.candidate.item.id.as_str(),
                similarity = best.similarity,
                "Fast-path duplicate, skipping without provider call"
            );
            let confidence = f64::from(best.similarity).clamp(0.0, 1.0);
            return ClassificationDecision {
                decision: Decision::Skip,
                reasoning: format!(
                    "Near-exact duplicate of past item {} (embedding similarity {:.2}, lexical {:.2})",
                    best.candidate.item.id,
                    best.similarity,
                    best.lexical().combined(),
                ),
                contextual_summary: None,
                references: vec![best.candidate.item.id.clone()],
                confidence,
                update_kind: None,
                reliability: ReliabilityTier::from_confidence(confidence),
                provider: None,
            };
        }

        let user_prompt = build_classification_prompt(current, ranked);
        let routed = self
            .router
            .invoke_or::<JudgmentSchema, _>(
                CLASSIFY_SYSTEM_PROMPT,
                &user_prompt,
                max_retries_primary,
                || RawJudgment {
                    decision: Decision::Keep,
                    reasoning: format!(
                        "All providers exhausted while classifying {:?}; keeping by default",
                        current.title
                    ),
                    contextual_summary: None,
                    references: Vec::new(),
                    confidence: 0.2,
                    update_kind: None,
                },
            )
            .await;

        let discount = if routed.synthesized {
            1.0
        } else {
            routed.confidence_discount
        };
        self.apply_policy(routed.value, discount, routed.provider, ranked)
    }

    /// Fold the raw judgment through the arbiter's invariants.
    fn apply_policy(
        &self,
        raw: RawJudgment,
        discount: f64,
        provider: Option<String>,
        ranked: &[RankedCandidate],
    ) -> ClassificationDecision {
        let confidence = (raw.confidence.clamp(0.0, 1.0) * discount).clamp(0.0, 1.0);

        // Only ids the provider was actually shown count as references.
        let references: Vec<String> = raw
            .references
            .into_iter()
            .filter(|id| ranked.iter().any(|c| c.candidate.item.id == *id))
            .collect();

        let mut decision = raw.decision;
        let mut reasoning = raw.reasoning;
        let mut contextual_summary = raw.contextual_summary;
        let mut update_kind = raw.update_kind;

        if decision == Decision::Update {
            // An update must carry a 3-4 bullet contextual summary.
            let summary_ok = contextual_summary.as_ref().is_some_and(|s| {
                (3..=4).contains(&s.len()) && s.iter().all(|b| !b.trim().is_empty())
            });
            if !summary_ok || references.is_empty() || update_kind.is_none() {
                tracing::warn!("Incomplete update judgment, downgrading to keep");
                decision = Decision::Keep;
                reasoning =
                    format!("{reasoning} [downgraded: update judgment was incomplete]");
            }
        }

        // Low confidence means we do not trust a destructive decision.
        if decision != Decision::Keep && confidence < self.config.low_confidence_floor {
            tracing::info!(
                confidence,
                "Low-confidence judgment, resolving to keep"
            );
            decision = Decision::Keep;
            reasoning = format!("{reasoning} [low confidence, kept by default]");
        }

        if decision != Decision::Update {
            contextual_summary = None;
            update_kind = None;
        }

        ClassificationDecision {
            decision,
            reasoning,
            contextual_summary,
            references,
            confidence,
            update_kind,
            reliability: ReliabilityTier::from_confidence(confidence),
            provider,
        }
    }
}

fn build_classification_prompt(current: &ContentItem, ranked: &[RankedCandidate]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Current article:");
    let _ = writeln!(prompt, "id: {}", current.id);
    let _ = writeln!(prompt, "title: {}", current.title);
    let _ = writeln!(prompt, "published: {}", current.published_at.to_rfc3339());
    let _ = writeln!(prompt, "body: {}\n", truncate(&current.body, 2000));
    let _ = writeln!(prompt, "Similar past articles:");
    for candidate in ranked {
        let item = &candidate.candidate.item;
        let _ = writeln!(
            prompt,
            "- id: {} (similarity {:.2})\n  title: {}\n  published: {}\n  body: {}",
            item.id,
            candidate.similarity,
            item.title,
            item.published_at.to_rfc3339(),
            truncate(&item.body, 600),
        );
    }
    prompt
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
