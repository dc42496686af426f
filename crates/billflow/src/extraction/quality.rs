//! Heuristic quality score for extracted text.

/// Marker lopdf emits for glyphs in CID fonts it cannot decode.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Character count at which the length component saturates.
const FULL_LENGTH_CHARS: usize = 200;

/// Keyword hits at which the keyword component saturates.
const FULL_KEYWORD_HITS: usize = 3;

const LENGTH_WEIGHT: f64 = 0.3;
const ALNUM_WEIGHT: f64 = 0.4;
const KEYWORD_WEIGHT: f64 = 0.3;

/// Scores text in [0, 1] from its length, the share of alphanumeric
/// characters among non-whitespace ones, and how many domain keywords it
/// contains. Decoding-error markers are stripped before scoring.
pub fn score(text: &str, keywords: &[String]) -> f64 {
    let cleaned = text.replace(IDENTITY_H_PATTERN, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return 0.0;
    }

    let total_chars = cleaned.chars().count();
    let length = (total_chars as f64 / FULL_LENGTH_CHARS as f64).min(1.0);

    let visible: Vec<char> = cleaned.chars().filter(|c| !c.is_whitespace()).collect();
    let alnum_ratio = if visible.is_empty() {
        0.0
    } else {
        visible.iter().filter(|c| c.is_alphanumeric()).count() as f64 / visible.len() as f64
    };

    let lower = cleaned.to_lowercase();
    let hits = keywords
        .iter()
        .filter(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
        .count();
    let keyword = (hits as f64 / FULL_KEYWORD_HITS as f64).min(1.0);

    let score = LENGTH_WEIGHT * length + ALNUM_WEIGHT * alnum_ratio + KEYWORD_WEIGHT * keyword;
    score.clamp(0.0, 1.0)
}
