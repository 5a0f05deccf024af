//! Answer similarity: exact, word-subset and token-sort fuzzy matching.
//!
//! Scores are integers in `0..=100`, rounded the same way for every scorer so that
//! thresholds compare against what a player would see in diagnostics.

use rapidfuzz::fuzz;
use std::collections::HashSet;

/// Token-sort ratio an answer must strictly exceed.
pub const FUZZY_MATCH_THRESHOLD: u8 = 90;
/// Partial ratio an element probe must strictly exceed.
pub const ELEMENT_PROBE_THRESHOLD: u8 = 70;

/// Decides whether `candidate` answers `correct`. Both sides are expected to be
/// preprocessed already.
pub fn is_match(correct: &str, candidate: &str) -> bool {
    let correct = correct.to_lowercase();
    let candidate = candidate.to_lowercase();
    if correct == candidate {
        return true;
    }

    let correct_words: HashSet<&str> = correct.split_whitespace().collect();
    if !correct_words.is_empty() {
        let candidate_words: HashSet<&str> = candidate.split_whitespace().collect();
        if correct_words.is_subset(&candidate_words) {
            return true;
        }
    }

    exceeds_fuzzy_threshold(token_sort_ratio(&correct, &candidate))
}

pub fn exceeds_fuzzy_threshold(score: u8) -> bool {
    score > FUZZY_MATCH_THRESHOLD
}

/// Indel similarity of two strings.
pub fn ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    to_score(fuzz::ratio(a.chars(), b.chars()))
}

/// [`ratio`] after lowercasing, stripping punctuation and sorting the words of both sides.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Best [`ratio`] of the shorter string against every equally long window of the longer one.
///
/// Windows are never truncated at the edges and every offset is scored, not only offsets where
/// matching blocks start. Scores can therefore differ slightly from fuzzywuzzy's `partial_ratio`
/// for the same pair.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0;
    }

    let mut best = 0;
    for window in long.windows(short.len()) {
        let score = to_score(fuzz::ratio(short.iter().copied(), window.iter().copied()));
        if score > best {
            best = score;
            if best == 100 {
                break;
            }
        }
    }
    best
}

fn sorted_tokens(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn to_score(similarity: f64) -> u8 {
    (similarity * 100.0).round().clamp(0.0, 100.0) as u8
}
