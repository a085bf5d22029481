//! Lexical duplicate screening.
//!
//! Cheap shortlist pass run before any embedding or provider call: two
//! lexical metrics over normalized title+body text, a Jaccard coefficient on
//! token sets and a Ratcliff/Obershelp sequence ratio on characters. Either
//! metric clearing its floor admits a past item to the shortlist. The floors
//! are looser than the final duplicate threshold; over-inclusion here is
//! intended, the embedding classifier tightens the set afterwards.

use std::collections::HashSet;

use crate::config::ScreeningConfig;
use crate::item::ContentItem;

/// Characters of normalized text the sequence ratio looks at. Bounds the
/// quadratic match search; near-duplicates reveal themselves well before
/// this.
const SEQUENCE_PREFIX_CHARS: usize = 800;

/// Both lexical metrics for one current/past pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalScore {
    pub jaccard: f32,
    pub sequence: f32,
}

impl LexicalScore {
    /// Single ordering key for the shortlist. The stronger metric wins: a
    /// verbatim repost with a rewritten headline still ranks high.
    pub fn combined(self) -> f32 {
        self.jaccard.max(self.sequence)
    }
}

/// A past item admitted by the screener, with the scores that admitted it.
#[derive(Debug, Clone)]
pub struct ScreenedCandidate {
    pub item: ContentItem,
    pub lexical: LexicalScore,
}

/// Shortlist past items plausibly related to `current`.
///
/// Returns at most `shortlist_cap` candidates ordered by combined score
/// descending.
pub fn screen(
    current: &ContentItem,
    past_window: &[ContentItem],
    config: &ScreeningConfig,
) -> Vec<ScreenedCandidate> {
    let current_text = normalize(&current.comparison_text());
    let current_tokens: HashSet<&str> = current_text.split_whitespace().collect();

    let mut candidates: Vec<ScreenedCandidate> = past_window
        .iter()
        .filter(|past| past.id != current.id)
        .filter_map(|past| {
            let past_text = normalize(&past.comparison_text());
            let past_tokens: HashSet<&str> = past_text.split_whitespace().collect();
            let lexical = LexicalScore {
                jaccard: jaccard(&current_tokens, &past_tokens),
                sequence: sequence_ratio(&current_text, &past_text),
            };
            let admitted = lexical.jaccard >= config.jaccard_floor
                || lexical.sequence >= config.sequence_floor;
            admitted.then(|| ScreenedCandidate {
                item: past.clone(),
                lexical,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.lexical
            .combined()
            .partial_cmp(&a.lexical.combined())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(config.shortlist_cap);

    tracing::debug!(
        item = current.id.as_str(),
        window = past_window.len(),
        shortlisted = candidates.len(),
        "Lexical screening complete"
    );
    candidates
}

/// Both metrics for one pair, with no floor applied. Used when the whole
/// window is ranked by embeddings and the lexical scores are only needed for
/// the duplicate fast path.
pub fn score_pair(current: &ContentItem, past: &ContentItem) -> LexicalScore {
    let current_text = normalize(&current.comparison_text());
    let past_text = normalize(&past.comparison_text());
    let current_tokens: HashSet<&str> = current_text.split_whitespace().collect();
    let past_tokens: HashSet<&str> = past_text.split_whitespace().collect();
    LexicalScore {
        jaccard: jaccard(&current_tokens, &past_tokens),
        sequence: sequence_ratio(&current_text, &past_text),
    }
}

/// Lowercase, strip punctuation to spaces, collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_space = true;
        }
    }
    out
}

/// Jaccard coefficient over token sets. Two empty texts count as identical.
pub fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// Ratcliff/Obershelp similarity on the first [`SEQUENCE_PREFIX_CHARS`]
/// characters of each normalized text: twice the total matched characters
/// over the combined length.
pub fn sequence_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().take(SEQUENCE_PREFIX_CHARS).collect();
    let b: Vec<char> = b.chars().take(SEQUENCE_PREFIX_CHARS).collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matched = matched_chars(&a, &b);
    2.0 * matched as f32 / (a.len() + b.len()) as f32
}

/// Total characters covered by recursively matching the longest common
/// substring, then the text on each side of it.
fn matched_chars(a: &[char], b: &[char]) -> usize {
    // Explicit work stack; the recursion depth is data-dependent.
    let mut total = 0;
    let mut stack: Vec<(&[char], &[char])> = vec![(a, b)];
    while let Some((a, b)) = stack.pop() {
        if a.is_empty() || b.is_empty() {
            continue;
        }
        let (start_a, start_b, len) = longest_common_substring(a, b);
        if len == 0 {
            continue;
        }
        total += len;
        stack.push((&a[..start_a], &b[..start_b]));
        stack.push((&a[start_a + len..], &b[start_b + len..]));
    }
    total
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // Rolling single row keeps this at O(len_b) memory.
    let mut row = vec![0_usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        let mut prev_diag = 0;
        for (j, &cb) in b.iter().enumerate() {
            let current = row[j + 1];
            row[j + 1] = if ca == cb { prev_diag + 1 } else { 0 };
            if row[j + 1] > best.2 {
                best = (i + 1 - row[j + 1], j + 1 - row[j + 1], row[j + 1]);
            }
            prev_diag = current;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str, title: &str, body: &str) -> ContentItem {
        ContentItem::new(id, title, body, Utc::now(), "rss")
    }

    fn tokens(text: &str) -> HashSet<&str> {
        text.split_whitespace().collect()
    }

    #[test]
    fn identical_texts_score_one_on_both_metrics() {
        let text = normalize("Acme ships WidgetKit 2.0 with new rendering engine");
        assert!((jaccard(&tokens(&text), &tokens(&text)) - 1.0).abs() < f32::EPSILON);
        assert!((sequence_ratio(&text, &text) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn disjoint_vocabulary_scores_zero_jaccard() {
        let a = normalize("quarterly earnings beat expectations");
        let b = normalize("volcanic eruption disrupts flights");
        assert_eq!(jaccard(&tokens(&a), &tokens(&b)), 0.0);
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(
            normalize("Acme, Inc. SHIPS   WidgetKit-2!"),
            "acme inc ships widgetkit 2"
        );
    }

    #[test]
    fn sequence_ratio_is_symmetric_and_bounded() {
        let a = "the quick brown fox jumps over the lazy dog";
        let b = "the quick brown fox leaps over a lazy dog";
        let ab = sequence_ratio(a, b);
        let ba = sequence_ratio(b, a);
        assert!((ab - ba).abs() < 1e-6);
        assert!(ab > 0.7 && ab < 1.0);
    }

    #[test]
    fn either_metric_admits_a_candidate() {
        // Same vocabulary, scrambled order: high Jaccard, weaker sequence.
        let current = item("cur", "alpha beta gamma delta epsilon zeta", "");
        let scrambled = item("p1", "zeta epsilon delta gamma beta alpha", "");
        let unrelated = item("p2", "completely different words entirely here now", "");

        let config = ScreeningConfig::default();
        let shortlist = screen(&current, &[scrambled, unrelated], &config);
        assert_eq!(shortlist.len(), 1);
        assert_eq!(shortlist[0].item.id, "p1");
        assert!(shortlist[0].lexical.jaccard >= config.jaccard_floor);
    }

    #[test]
    fn shortlist_is_capped_and_ordered() {
        let current = item("cur", "acme ships widgetkit two with rendering engine", "");
        let mut window = Vec::new();
        for i in 0..15 {
            window.push(item(
                &format!("p{i}"),
                "acme ships widgetkit two with rendering engine",
                "",
            ));
        }
        let config = ScreeningConfig {
            shortlist_cap: 3,
            ..ScreeningConfig::default()
        };
        let shortlist = screen(&current, &window, &config);
        assert_eq!(shortlist.len(), 3);
        for pair in shortlist.windows(2) {
            assert!(pair[0].lexical.combined() >= pair[1].lexical.combined());
        }
    }

    #[test]
    fn current_item_is_never_its_own_candidate() {
        let current = item("same", "identical title text here", "identical body");
        let shortlist = screen(
            &current,
            std::slice::from_ref(&current),
            &ScreeningConfig::default(),
        );
        assert!(shortlist.is_empty());
    }

    #[test]
    fn unrelated_window_yields_empty_shortlist() {
        let current = item("cur", "acme ships widgetkit", "rendering engine rewrite");
        let window = vec![
            item("p1", "volcano erupts in iceland", "flights grounded"),
            item("p2", "quarterly earnings preview", "analyst expectations"),
        ];
        assert!(screen(&current, &window, &ScreeningConfig::default()).is_empty());
    }
}
