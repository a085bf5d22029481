//! Bullet-point summarization through the same provider router.
//!
//! The summary path exercises the full recovery chain: providers that answer
//! in prose or bare bullet lists still produce a usable result via the list
//! and sentence strategies. On total exhaustion the summary is synthesized
//! from the item itself, never dropped.

use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::item::{ContentItem, ReliabilityTier, SummaryResult};
use crate::llm::ProviderRouter;
use crate::recovery::ResponseSchema;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a news summarizer. Summarize \
the article into 3-4 self-contained bullet points, each a full sentence of \
at least 30 characters. Respond with a single JSON object: \
{\"bullets\": [\"...\", \"...\"]}. No prose outside the JSON object.";

/// Base confidence for a provider-produced summary, before the recovery
/// discount.
const PROVIDER_SUMMARY_CONFIDENCE: f64 = 0.9;

pub const MIN_BULLET_CHARS: usize = 30;
pub const MAX_BULLETS: usize = 6;

#[derive(Debug, Deserialize)]
pub struct RawSummary {
    pub bullets: Vec<String>,
}

pub struct SummarySchema;

impl ResponseSchema for SummarySchema {
    type Output = RawSummary;

    fn required_keys() -> &'static [&'static str] {
        &["bullets"]
    }

    fn from_list_items(items: Vec<String>) -> Option<Value> {
        Some(json!({ "bullets": items }))
    }

    fn validate(value: &Value) -> Result<(), String> {
        let bullets = value
            .get("bullets")
            .and_then(Value::as_array)
            .ok_or("bullets must be an array")?;
        if bullets.is_empty() || bullets.len() > MAX_BULLETS {
            return Err(format!(
                "expected 1-{MAX_BULLETS} bullets, got {}",
                bullets.len()
            ));
        }
        for bullet in bullets {
            let text = bullet.as_str().ok_or("bullet must be a string")?;
            if text.trim().len() < MIN_BULLET_CHARS {
                return Err(format!(
                    "bullet shorter than {MIN_BULLET_CHARS} chars: {text:?}"
                ));
            }
        }
        Ok(())
    }
}

pub struct Summarizer {
    router: Arc<ProviderRouter>,
}

impl Summarizer {
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        Self { router }
    }

    /// Summarize one item. Never fails; exhaustion yields a synthesized
    /// summary built from the item's own text with confidence 0.0.
    pub async fn summarize(&self, item: &ContentItem, max_retries_primary: u32) -> SummaryResult {
        let user_prompt = format!(
            "Title: {}\nSource: {}\nPublished: {}\n\n{}",
            item.title,
            item.source,
            item.published_at.to_rfc3339(),
            item.body,
        );

        let routed = self
            .router
            .invoke_or::<SummarySchema, _>(
                SUMMARY_SYSTEM_PROMPT,
                &user_prompt,
                max_retries_primary,
                || RawSummary {
                    bullets: synthesize_bullets(item),
                },
            )
            .await;

        let confidence = if routed.synthesized {
            0.0
        } else {
            (PROVIDER_SUMMARY_CONFIDENCE * routed.confidence_discount).clamp(0.0, 1.0)
        };

        SummaryResult {
            bullets: routed.value.bullets,
            confidence,
            reliability: ReliabilityTier::from_confidence(confidence),
            provider: routed.provider,
            strategy: routed.strategy,
            synthesized: routed.synthesized,
        }
    }
}

/// Local fallback result built without any provider involvement.
pub(crate) fn synthesized_result(item: &ContentItem) -> SummaryResult {
    SummaryResult {
        bullets: synthesize_bullets(item),
        confidence: 0.0,
        reliability: ReliabilityTier::from_confidence(0.0),
        provider: None,
        strategy: None,
        synthesized: true,
    }
}

/// Build a minimal summary from the item itself: the title as the lead
/// bullet, then the first body sentences long enough to stand alone.
fn synthesize_bullets(item: &ContentItem) -> Vec<String> {
    let mut bullets = Vec::with_capacity(3);

    let lead = format!("{} ({})", item.title.trim(), item.source.trim());
    bullets.push(pad_bullet(lead, &item.body));

    for sentence in item
        .body
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.len() >= MIN_BULLET_CHARS)
        .take(2)
    {
        bullets.push(sentence.to_string());
    }

    bullets
}

/// Extend a too-short lead bullet with body text until the minimum length
/// invariant holds.
fn pad_bullet(mut bullet: String, body: &str) -> String {
    if bullet.len() < MIN_BULLET_CHARS {
        let mut extra: String = body.chars().take(2 * MIN_BULLET_CHARS).collect();
        extra.truncate(extra.trim_end().len());
        if !extra.is_empty() {
            bullet.push_str(": ");
            bullet.push_str(&extra);
        }
    }
    while bullet.len() < MIN_BULLET_CHARS {
        // Degenerate input (near-empty title and body); the marker keeps
        // the output honest about where the text came from.
        bullet.push_str(" [no further content]");
    }
    bullet
}
