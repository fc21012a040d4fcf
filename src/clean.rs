//! Candidate cleaning: boilerplate removal, garble repair, separator and
//! casing normalization, author list canonicalization.
//!
//! Every function here is idempotent: cleaning already-clean text returns it
//! unchanged.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::RawCandidate;

static WORD_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*microsoft\s+word\s*-\s*").expect("valid regex"));
static BRACKET_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[\[\(]\s*(?:pdf|epub|mobi|azw3|djvu|e-?book|retail|scan|z-lib(?:\.org)?|z-library|libgen(?:\.[a-z]+)?|www\.[^\]\)]*)\s*[\]\)]",
    )
    .expect("valid regex")
});
static BARE_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:z-lib\.org|z-library|libgen(?:\.[a-z]+)?)\b").expect("valid regex")
});
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("valid regex"));
static EXTENSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(?:pdf|epub|mobi|azw3?|djvu|docx?)\s*$").expect("valid regex")
});
static EMPTY_BRACKETS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\)|\[\s*\]").expect("valid regex"));
static GARBLED_AND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\p{Lu})_(\p{Ll}{2})").expect("valid regex"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+@\S+").expect("valid regex"));
static AUTHOR_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:;|&|\band\b)\s*").expect("valid regex"));
static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(1[5-9]\d{2}|20\d{2})\b").expect("valid regex"));

/// Authors beyond this count collapse to `First et al`.
const MAX_LISTED_AUTHORS: usize = 3;

const SMALL_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "but", "by", "for", "in", "nor", "of", "on", "or", "the", "to",
    "vs", "via", "with",
];

const PLACEHOLDERS: &[&str] = &[
    "unknown",
    "unknown author",
    "unknown title",
    "untitled",
    "admin",
    "administrator",
    "user",
    "owner",
    "anonymous",
    "author",
    "title",
    "document",
    "none",
    "null",
    "n a",
    "na",
];

pub(crate) fn is_small_word(word: &str) -> bool {
    SMALL_WORDS.contains(&word.to_lowercase().as_str())
}

/// Values producers write when they have nothing real to say.
pub fn is_placeholder(value: &str) -> bool {
    let key = comparable(value);
    key.is_empty() || PLACEHOLDERS.contains(&key.as_str())
}

/// Lower-case alphanumeric tokens joined by single spaces. Used for
/// agreement checks and fingerprints.
pub fn comparable(value: &str) -> String {
    value
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First plausible four-digit year in `text`.
pub fn find_year(text: &str) -> Option<i32> {
    YEAR_RE
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
}

/// All plausible years in `text` with their byte offsets.
pub(crate) fn years_with_offsets(text: &str) -> impl Iterator<Item = (i32, usize, usize)> + '_ {
    YEAR_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<i32>().ok().map(|y| (y, m.start(), m.end())))
}

pub fn clean_candidate(candidate: &RawCandidate) -> RawCandidate {
    RawCandidate {
        source: candidate.source,
        author: candidate.author.as_deref().and_then(clean_author),
        title: candidate.title.as_deref().and_then(clean_title),
        year: candidate.year,
        quality: candidate.quality,
    }
}

pub fn clean_title(raw: &str) -> Option<String> {
    let text = scrub(raw);
    let text = normalize_case(&text, true);
    if is_placeholder(&text) {
        return None;
    }
    Some(text)
}

pub fn clean_author(raw: &str) -> Option<String> {
    let text = GARBLED_AND_RE.replace_all(raw, "${1}and${2}");
    let text = EMAIL_RE.replace_all(&text, " ");
    let text = scrub(&text);

    let mut names: Vec<String> = Vec::new();
    for part in split_authors(&text) {
        let name = normalize_separators(&part);
        let name = normalize_case(&name, false);
        if is_placeholder(&name) {
            continue;
        }
        if !names.iter().any(|n| comparable(n) == comparable(&name)) {
            names.push(name);
        }
    }

    match names.len() {
        0 => None,
        n if n > MAX_LISTED_AUTHORS => Some(format!("{} et al", names[0])),
        _ => Some(names.join(", ")),
    }
}

/// Split an author field into individual names, turning `Last, First` into
/// `First Last`.
fn split_authors(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in AUTHOR_SPLIT_RE.split(text) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let pieces: Vec<&str> = part.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
        let single_tokens = pieces.iter().all(|p| p.split_whitespace().count() == 1);
        if pieces.len() == 2 && single_tokens {
            out.push(format!("{} {}", pieces[1], pieces[0]));
        } else {
            out.extend(pieces.into_iter().map(str::to_string));
        }
    }
    out
}

/// Strip boilerplate and normalize separators until neither changes the
/// text. Removing one tag or extension can expose another.
fn scrub(raw: &str) -> String {
    let mut text = normalize_separators(&strip_boilerplate(raw));
    loop {
        let next = normalize_separators(&strip_boilerplate(&text));
        if next == text {
            return text;
        }
        text = next;
    }
}

fn strip_boilerplate(raw: &str) -> String {
    let text = WORD_PREFIX_RE.replace(raw, "");
    let text = URL_RE.replace_all(&text, " ");
    let text = BRACKET_TAG_RE.replace_all(&text, " ");
    let text = BARE_TAG_RE.replace_all(&text, " ");
    let text = EXTENSION_RE.replace(&text, "");
    EMPTY_BRACKETS_RE.replace_all(&text, " ").into_owned()
}

/// Underscores and runs of whitespace become single spaces; separator
/// punctuation is trimmed from both ends.
fn normalize_separators(text: &str) -> String {
    let spaced = text.replace('_', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '–' | '—' | ',' | ';' | ':'))
        .to_string()
}

/// Title-case text whose letters are all upper-case or all lower-case.
/// Mixed-case input is left alone.
fn normalize_case(text: &str, small_words: bool) -> String {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 2 {
        return text.to_string();
    }
    let all_upper = letters.iter().all(|c| c.is_uppercase());
    let all_lower = letters.iter().all(|c| c.is_lowercase());
    if !all_upper && !all_lower {
        return text.to_string();
    }

    text.split(' ')
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if small_words && i > 0 && SMALL_WORDS.contains(&lower.as_str()) {
                lower
            } else {
                capitalize(&lower)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut upper_next = true;
    for c in word.chars() {
        if upper_next && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
            if c == '-' {
                upper_next = true;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbled_and_is_repaired_in_authors() {
        assert_eq!(clean_author("S_or Dargo").as_deref(), Some("Sandor Dargo"));
        assert_eq!(clean_author("S_or_Dargo").as_deref(), Some("Sandor Dargo"));
    }

    #[test]
    fn last_first_is_reordered() {
        assert_eq!(clean_author("Knuth, Donald").as_deref(), Some("Donald Knuth"));
    }

    #[test]
    fn author_lists_are_split_and_joined() {
        assert_eq!(
            clean_author("Gamma; Helm & Johnson and Vlissides").as_deref(),
            Some("Gamma et al")
        );
        assert_eq!(
            clean_author("Harold Abelson and Gerald Jay Sussman").as_deref(),
            Some("Harold Abelson, Gerald Jay Sussman")
        );
    }

    #[test]
    fn placeholder_authors_vanish() {
        assert_eq!(clean_author("Administrator"), None);
        assert_eq!(clean_author("unknown"), None);
        assert_eq!(clean_author("   "), None);
    }

    #[test]
    fn boilerplate_is_stripped_from_titles() {
        assert_eq!(
            clean_title("Microsoft Word - The_Rust_Book [PDF] (z-lib.org).pdf").as_deref(),
            Some("The Rust Book")
        );
        assert_eq!(
            clean_title("Clean Code (ebook) www.example.com").as_deref(),
            Some("Clean Code")
        );
    }

    #[test]
    fn stacked_boilerplate_is_stripped_in_one_pass() {
        assert_eq!(clean_title("Book.pdf.pdf").as_deref(), Some("Book"));
        assert_eq!(
            clean_title("Microsoft Word - Microsoft Word - Draft").as_deref(),
            Some("Draft")
        );
        assert_eq!(clean_title("Notes.pdf -").as_deref(), Some("Notes"));
    }

    #[test]
    fn uniform_case_is_title_cased() {
        assert_eq!(
            clean_title("THE ART OF COMPUTER PROGRAMMING").as_deref(),
            Some("The Art of Computer Programming")
        );
        assert_eq!(
            clean_title("the pragmatic programmer").as_deref(),
            Some("The Pragmatic Programmer")
        );
        assert_eq!(clean_title("Daily C++ Interview").as_deref(), Some("Daily C++ Interview"));
    }

    #[test]
    fn cleaning_is_idempotent() {
        let titles = [
            "THE ART OF COMPUTER PROGRAMMING",
            "Microsoft Word - draft_v2 [pdf]",
            "  --the c programming language--  ",
            "Real-time rendering (ebook)",
            "a",
            "Daily_C++_Interview",
            "Book.pdf.pdf",
            "Microsoft Word - Microsoft Word - Draft",
            "Notes.pdf -",
            "Report.PDF (ebook).epub",
        ];
        for t in titles {
            let once = clean_title(t);
            let twice = once.as_deref().and_then(clean_title);
            assert_eq!(once, twice, "title {:?}", t);
        }
        let authors = [
            "S_or Dargo",
            "Knuth, Donald",
            "A; B; C; D",
            "JOHN SMITH & jane doe",
            "Abelson, H. and Sussman, G.",
            "jean-paul sartre",
            "Microsoft Word - Microsoft Word - jane doe",
            "jane doe.pdf -",
        ];
        for a in authors {
            let once = clean_author(a);
            let twice = once.as_deref().and_then(clean_author);
            assert_eq!(once, twice, "author {:?}", a);
        }
    }

    #[test]
    fn comparable_ignores_case_and_punctuation() {
        assert_eq!(comparable("Sandor  Dargo."), comparable("sandor_dargo"));
        assert_eq!(comparable("C++ Primer"), "c primer");
    }

    #[test]
    fn find_year_respects_word_boundaries() {
        assert_eq!(find_year("D:20230115120000"), None);
        assert_eq!(find_year("Copyright © 2019 Foo"), Some(2019));
        assert_eq!(find_year("ISBN 9781234567890"), None);
    }
}
