//! Best-effort extraction of structured values from provider responses.
//!
//! Providers are asked for JSON but frequently wrap it in prose, fenced code
//! blocks, or bullet lists — or ignore the format entirely. Recovery runs an
//! ordered chain of independent strategies; the first one that yields a
//! document carrying the schema's required keys wins, and the result is
//! tagged with the strategy that produced it. Strategies 5-6 reconstruct
//! rather than decode, so they carry a confidence discount.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecoveryError;

/// Which extraction method produced a recovered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Whole response parsed as JSON directly.
    DirectParse,
    /// JSON extracted from a triple-backtick fenced block.
    FencedBlock,
    /// Smallest balanced `{...}` fragment containing the required keys.
    BalancedFragment,
    /// Fence markers stripped from both ends, then parsed.
    StrippedWrapper,
    /// Document synthesized from list-marker lines.
    ListMarkers,
    /// Document synthesized from salvaged sentences.
    SentenceSalvage,
}

impl RecoveryStrategy {
    /// 1-based position in the chain.
    pub fn index(self) -> u8 {
        match self {
            Self::DirectParse => 1,
            Self::FencedBlock => 2,
            Self::BalancedFragment => 3,
            Self::StrippedWrapper => 4,
            Self::ListMarkers => 5,
            Self::SentenceSalvage => 6,
        }
    }

    /// True for strategies that reconstruct a document instead of decoding
    /// one the provider actually emitted.
    pub fn is_reconstruction(self) -> bool {
        matches!(self, Self::ListMarkers | Self::SentenceSalvage)
    }

    /// Multiplier applied to the result's confidence.
    pub fn confidence_discount(self) -> f64 {
        if self.is_reconstruction() { 0.3 } else { 1.0 }
    }
}

/// Contract a structured response type implements so the recovery chain can
/// find, rebuild and validate it.
pub trait ResponseSchema {
    type Output: DeserializeOwned;

    /// Top-level keys a candidate document must contain.
    fn required_keys() -> &'static [&'static str];

    /// Build a document from bare list items (strategies 5-6). Schemas
    /// without a list field return `None`, which disables both strategies.
    fn from_list_items(items: Vec<String>) -> Option<Value> {
        let _ = items;
        None
    }

    /// Semantic validation after structural recovery: field bounds, array
    /// lengths, per-string minimums.
    fn validate(value: &Value) -> Result<(), String>;
}

/// A structured value plus how it was obtained.
#[derive(Debug, Clone)]
pub struct Recovered<T> {
    pub value: T,
    pub strategy: RecoveryStrategy,
    pub confidence_discount: f64,
}

const STRATEGY_COUNT: u8 = 6;

/// Run the strategy chain over `raw`, first success wins.
///
/// A strategy only counts as successful if its document carries all of the
/// schema's required top-level keys; the first such document is then
/// validated, and a validation failure fails the whole attempt (the router
/// treats that like any other attempt failure).
pub fn recover<S: ResponseSchema>(raw: &str) -> Result<Recovered<S::Output>, RecoveryError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RecoveryError::Empty);
    }

    let candidate = run_chain::<S>(trimmed);

    let Some((strategy, value)) = candidate else {
        return Err(RecoveryError::Unrecoverable {
            strategies_tried: STRATEGY_COUNT,
        });
    };

    S::validate(&value).map_err(RecoveryError::Validation)?;
    let value: S::Output =
        serde_json::from_value(value).map_err(|e| RecoveryError::Validation(e.to_string()))?;

    Ok(Recovered {
        value,
        strategy,
        confidence_discount: strategy.confidence_discount(),
    })
}

fn run_chain<S: ResponseSchema>(text: &str) -> Option<(RecoveryStrategy, Value)> {
    if let Some(value) = direct_parse(text).filter(|v| has_required_keys(v, S::required_keys())) {
        return Some((RecoveryStrategy::DirectParse, value));
    }

    if let Some(value) = extract_fenced(text)
        .and_then(|inner| direct_parse(inner.trim()))
        .filter(|v| has_required_keys(v, S::required_keys()))
    {
        return Some((RecoveryStrategy::FencedBlock, value));
    }

    if let Some(value) = smallest_balanced_fragment(text, S::required_keys()) {
        return Some((RecoveryStrategy::BalancedFragment, value));
    }

    if let Some(value) =
        direct_parse(&strip_fence_markers(text)).filter(|v| has_required_keys(v, S::required_keys()))
    {
        return Some((RecoveryStrategy::StrippedWrapper, value));
    }

    let list_items = collect_list_items(text);
    if list_items.len() >= 3
        && let Some(value) = S::from_list_items(list_items)
        && has_required_keys(&value, S::required_keys())
    {
        return Some((RecoveryStrategy::ListMarkers, value));
    }

    let sentences = salvage_sentences(text);
    if !sentences.is_empty()
        && let Some(value) = S::from_list_items(sentences)
        && has_required_keys(&value, S::required_keys())
    {
        return Some((RecoveryStrategy::SentenceSalvage, value));
    }

    None
}

fn has_required_keys(value: &Value, keys: &[&str]) -> bool {
    value
        .as_object()
        .is_some_and(|obj| keys.iter().all(|k| obj.contains_key(*k)))
}

fn direct_parse(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Contents of the first triple-backtick fenced block, language tag skipped.
fn extract_fenced(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip an optional language tag up to the end of the fence line.
    let body_start = after_fence.find('\n').map_or(after_fence.len(), |i| i + 1);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Smallest balanced `{...}` fragment that parses and holds the required
/// keys. Brace matching is string-aware so braces inside JSON strings do not
/// confuse the scan.
fn smallest_balanced_fragment(text: &str, keys: &[&str]) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut best: Option<(usize, Value)> = None;

    for (start, &byte) in bytes.iter().enumerate() {
        if byte != b'{' {
            continue;
        }
        if let Some(end) = matching_brace(bytes, start) {
            let fragment = &text[start..=end];
            if best.as_ref().is_some_and(|(len, _)| fragment.len() >= *len) {
                continue;
            }
            if let Some(value) = direct_parse(fragment).filter(|v| has_required_keys(v, keys)) {
                best = Some((fragment.len(), value));
            }
        }
    }

    best.map(|(_, value)| value)
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Drop fence-marker lines and stray backticks from both ends of the text.
fn strip_fence_markers(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut start = 0;
    let mut end = lines.len();

    while start < end && is_wrapper_line(lines[start]) {
        start += 1;
    }
    while end > start && is_wrapper_line(lines[end - 1]) {
        end -= 1;
    }

    lines[start..end].join("\n").trim_matches('`').to_string()
}

fn is_wrapper_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with("```")
}

/// Lines carrying a bullet or number marker, markers stripped.
fn collect_list_items(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            strip_list_marker(trimmed).map(str::to_string)
        })
        .filter(|item| !item.is_empty())
        .collect()
}

fn strip_list_marker(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "\u{2022} "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    // Numbered markers: "1. text" or "2) text".
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(stripped.trim());
        }
    }
    None
}

const MIN_SALVAGED_SENTENCE: usize = 30;
const MAX_SALVAGED_SENTENCES: usize = 4;

const META_MARKERS: &[&str] = &[
    "sorry",
    "apolog",
    "as an ai",
    "i cannot",
    "i can't",
    "i'm unable",
    "unfortunately",
    "here is",
    "here are",
];

/// Last-resort salvage: split into sentences, drop short ones and
/// apology/meta commentary, keep the first few.
fn salvage_sentences(text: &str) -> Vec<String> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.len() >= MIN_SALVAGED_SENTENCE)
        .filter(|s| {
            let lower = s.to_lowercase();
            !META_MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .take(MAX_SALVAGED_SENTENCES)
        .map(str::to_string)
        .collect()
}
