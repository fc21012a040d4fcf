//! Confidence scoring for merged records.
//!
//! Score = weighted evidence, in the style of a confidence assessor:
//!
//! | Signal    | Full credit                                        | Partial  |
//! |-----------|----------------------------------------------------|----------|
//! | author    | present and plausible (≥2 name tokens)             | present  |
//! | title     | present and at least `min_title_len` characters    | present  |
//! | year      | present and in `[min, max]`                        | -        |
//! | agreement | share of the three fields backed by ≥2 sources     | -        |
//!
//! Partial credit is validated to be at most full credit, and absent fields
//! count as unbacked for agreement, so adding a field or a confirming source
//! never lowers the score.

use crate::config::{ScoringConfig, YearsConfig};
use crate::models::MergedRecord;

/// Lower-case particles allowed inside a personal name.
const NAME_PARTICLES: &[&str] = &[
    "van", "von", "der", "den", "de", "del", "della", "di", "da", "du", "la", "le", "bin", "ibn",
    "al", "y",
];

pub fn score(record: &MergedRecord, years: &YearsConfig, weights: &ScoringConfig) -> f64 {
    let mut total = 0.0;

    if let Some(author) = record.author.as_deref() {
        total += if is_plausible_author(author) {
            weights.author
        } else {
            weights.partial
        };
    }

    if let Some(title) = record.title.as_deref() {
        total += if title.chars().count() >= weights.min_title_len {
            weights.title
        } else {
            weights.partial
        };
    }

    if record.year.is_some_and(|y| years.contains(y)) {
        total += weights.year;
    }

    let p = &record.provenance;
    let backed = [
        record.author.is_some() && p.author.len() >= 2,
        record.title.is_some() && p.title.len() >= 2,
        record.year.is_some() && p.year.len() >= 2,
    ]
    .iter()
    .filter(|b| **b)
    .count();
    total += weights.agreement * backed as f64 / 3.0;

    total.clamp(0.0, 1.0)
}

/// At least two name tokens, each an initial or a capitalized word. For an
/// author list only the first name is checked.
pub fn is_plausible_author(author: &str) -> bool {
    let first = author.split(", ").next().unwrap_or(author);
    let first = first.strip_suffix(" et al").unwrap_or(first);

    let tokens: Vec<&str> = first.split_whitespace().collect();
    let named = tokens
        .iter()
        .filter(|t| !NAME_PARTICLES.contains(&t.to_lowercase().as_str()))
        .count();
    named >= 2
        && tokens.iter().all(|t| {
            NAME_PARTICLES.contains(&t.to_lowercase().as_str()) || is_initial(t) || is_capitalized(t)
        })
}

fn is_initial(token: &str) -> bool {
    // "J." "J.R.R." "JRR"
    let letters: Vec<char> = token.chars().filter(|c| *c != '.').collect();
    !letters.is_empty() && letters.len() <= 3 && letters.iter().all(|c| c.is_uppercase())
}

fn is_capitalized(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_uppercase() => {
            chars.all(|c| c.is_alphabetic() || matches!(c, '-' | '\'' | '’' | '.'))
        }
        _ => false,
    }
}
