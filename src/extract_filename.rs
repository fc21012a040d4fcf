//! Filename pattern heuristics.
//!
//! Rules are tried in order against the file stem; the first match wins and
//! carries a quality hint reflecting how much structure it recognized. The
//! author/title dash separator must be surrounded by whitespace so that
//! hyphenated names (`Jean-Paul`) and titles (`Real-Time`) are not split.
//! A trailing ` (n)` collision counter is ignored.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::{RawCandidate, Source};

/// Quality of the whole-stem fallback. Below the merger's low-quality cut-off.
pub const FALLBACK_QUALITY: f64 = 0.1;

struct Rule {
    name: &'static str,
    pattern: &'static Lazy<Regex>,
    quality: f64,
}

static PUBLISHER_AUTHOR_TITLE_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[[^\]]*\]\s*(?P<author>.+?)\s+[-–—]\s+(?P<title>.+?)\s*\((?P<year>\d{4})[^)]*\)\s*$")
        .expect("valid regex")
});
static AUTHOR_TITLE_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<author>.+?)\s+[-–—]\s+(?P<title>.+?)\s*\((?P<year>\d{4})[^)]*\)\s*$")
        .expect("valid regex")
});
static TITLE_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<title>.+?)\s*\((?P<year>\d{4})[^)]*\)\s*$").expect("valid regex")
});
static FRIENDLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<first>\p{Lu}[\p{L}.'-]+)_(?P<last>\p{Lu}[\p{L}'-]+)_(?P<title>[^ ]+)_(?P<year>\d{4})$")
        .expect("valid regex")
});
static FRIENDLY_NO_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<first>\p{Lu}[\p{L}.'-]+)_(?P<last>\p{Lu}[\p{L}'-]+)_(?P<title>[^ ]+)$")
        .expect("valid regex")
});
static AUTHOR_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<author>.+?)\s+[-–—]\s+(?P<title>.+)$").expect("valid regex")
});

static COLLISION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+\(\d{1,3}\)$").expect("valid regex"));

static RULES: [Rule; 6] = [
    Rule {
        name: "publisher_author_title_year",
        pattern: &PUBLISHER_AUTHOR_TITLE_YEAR,
        quality: 0.9,
    },
    Rule {
        name: "author_title_year",
        pattern: &AUTHOR_TITLE_YEAR,
        quality: 0.9,
    },
    Rule {
        name: "title_year",
        pattern: &TITLE_YEAR,
        quality: 0.6,
    },
    Rule {
        name: "friendly",
        pattern: &FRIENDLY,
        quality: 0.6,
    },
    Rule {
        name: "friendly_no_year",
        pattern: &FRIENDLY_NO_YEAR,
        quality: 0.5,
    },
    Rule {
        name: "author_title",
        pattern: &AUTHOR_TITLE,
        quality: 0.7,
    },
];

/// Decompose a filename stem into author/title/year.
pub fn extract(stem: &str) -> RawCandidate {
    let unsuffixed = COLLISION_SUFFIX.replace(stem.trim(), "");
    let stem: &str = &unsuffixed;
    for rule in RULES.iter() {
        if let Some(caps) = rule.pattern.captures(stem) {
            tracing::debug!(rule = rule.name, stem, "filename rule matched");
            return from_captures(&caps, rule.quality);
        }
    }
    RawCandidate {
        source: Source::Filename,
        author: None,
        title: non_empty(stem),
        year: None,
        quality: FALLBACK_QUALITY,
    }
}

fn from_captures(caps: &Captures<'_>, quality: f64) -> RawCandidate {
    let author = match (caps.name("first"), caps.name("last")) {
        (Some(first), Some(last)) => Some(format!("{} {}", first.as_str(), last.as_str())),
        _ => caps.name("author").and_then(|m| non_empty(m.as_str())),
    };
    RawCandidate {
        source: Source::Filename,
        author,
        title: caps.name("title").and_then(|m| non_empty(m.as_str())),
        year: caps.name("year").and_then(|m| m.as_str().parse().ok()),
        quality,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
