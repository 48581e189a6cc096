//! Name similarity used by auto-mapping.
//!
//! # Algorithm
//! 1. Normalize both names: lowercase with Turkish i folding (`I`, `İ`, `ı`
//!    all become `i`), Turkish diacritics folded to ASCII, anything that is
//!    not a letter or digit becomes a space, whitespace collapsed.
//! 2. `score = max(levenshtein_similarity, token_set_ratio)` over the
//!    normalized forms, where
//!    `token_set_ratio = 0.5 * |A∩B|/|A∪B| + 0.5 * |A∩B|/min(|A|,|B|)`.
//!
//! Scores lie in `[0, 1]`. Identical normalized names score exactly `1.0`;
//! a name that normalizes to nothing scores `0.0` against everything.

use std::collections::BTreeSet;

use strsim::normalized_levenshtein;

fn fold_char(c: char) -> char {
    match c {
        'ç' => 'c',
        'ğ' => 'g',
        'ı' => 'i',
        'ö' => 'o',
        'ş' => 's',
        'ü' => 'u',
        'â' => 'a',
        'î' => 'i',
        'û' => 'u',
        c if c.is_alphanumeric() => c,
        _ => ' ',
    }
}

pub fn normalize(s: &str) -> String {
    let mut folded = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            // Rust's default lowering turns İ into "i\u{307}".
            'İ' | 'I' => folded.push('i'),
            '\u{307}' => {}
            _ => {
                for lc in ch.to_lowercase() {
                    if lc != '\u{307}' {
                        folded.push(fold_char(lc));
                    }
                }
            }
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokens(normalized: &str) -> BTreeSet<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}

/// Levenshtein similarity of already normalized strings.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b)
}

/// Token-set ratio of already normalized strings.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let common = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    let smaller = ta.len().min(tb.len()) as f64;
    0.5 * (common / union) + 0.5 * (common / smaller)
}

/// Similarity of two raw names.
pub fn score(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    levenshtein_similarity(&na, &nb)
        .max(token_set_ratio(&na, &nb))
        .clamp(0.0, 1.0)
}
