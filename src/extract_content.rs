//! Content inspection of leading pages (PDF) or spine documents (EPUB).
//!
//! Slow path: only run when the filename and embedded properties do not merge
//! into a confident record. Looks for a title-cased line near the top, an
//! author line (`By …`, `Author: …`, or a capitalized name list) and the most
//! frequent year that appears next to publication wording.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::clean::{is_small_word, years_with_offsets};
use crate::config::YearsConfig;
use crate::error::ExtractError;
use crate::extract::{
    open_epub, pdf_page_texts, read_package, read_zip_entry_bounded, xhtml_text, Document,
    DocumentKind,
};
use crate::models::{RawCandidate, Source};

const CONTENT_QUALITY: f64 = 0.5;
const TITLE_SCAN_LINES: usize = 15;
const AUTHOR_SCAN_LINES: usize = 20;
/// Bytes of text on either side of a year searched for publication wording.
const YEAR_CONTEXT_BYTES: usize = 24;

static NOT_A_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(abstract|introduction|contents|chapter|doi:|isbn|copyright|\d{4})")
        .expect("valid regex")
});
static NAME_LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\p{Lu}\p{Ll}+(?: \p{Lu}[\p{Ll}.]*)+(?:(?:, | and | & )\p{Lu}\p{Ll}+(?: \p{Lu}[\p{Ll}.]*)+)*$",
    )
    .expect("valid regex")
});
static BY_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:written\s+)?by\s+(.{3,})$").expect("valid regex"));
static AUTHOR_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^authors?\s*[:：]\s*(.{3,})$").expect("valid regex"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+@\S+\s*").expect("valid regex"));
static YEAR_CONTEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(publish|copyright|©|\(c\)|\bdate\b|received|accepted|edition|printed)")
        .expect("valid regex")
});

/// Scan up to `max_units` leading pages or spine documents.
pub fn extract(
    doc: &Document,
    max_units: usize,
    years: &YearsConfig,
) -> Result<RawCandidate, ExtractError> {
    let text = match doc.kind {
        DocumentKind::Pdf => pdf_page_texts(&doc.bytes, max_units)?.join("\n"),
        DocumentKind::Epub => epub_leading_text(&doc.bytes, max_units)?,
    };
    let candidate = analyze_text(&text, years);
    tracing::debug!(
        path = %doc.path.display(),
        author = ?candidate.author,
        title = ?candidate.title,
        year = ?candidate.year,
        "content scan"
    );
    Ok(candidate)
}

fn epub_leading_text(bytes: &[u8], max_units: usize) -> Result<String, ExtractError> {
    let mut archive = open_epub(bytes)?;
    let pkg = read_package(&mut archive)?;
    let mut out = String::new();
    for href in pkg.spine.iter().take(max_units) {
        // A broken spine entry should not hide the rest of the book.
        let xml = match read_zip_entry_bounded(&mut archive, href) {
            Ok(xml) => xml,
            Err(e) => {
                tracing::debug!(entry = %href, error = %e, "skipping spine entry");
                continue;
            }
        };
        match xhtml_text(&xml) {
            Ok(text) => {
                out.push_str(&text);
                out.push('\n');
            }
            Err(e) => tracing::debug!(entry = %href, error = %e, "unparsable spine entry"),
        }
    }
    Ok(out)
}

/// Heuristics over plain text. Pure so it can be tested without fixtures.
pub fn analyze_text(text: &str, years: &YearsConfig) -> RawCandidate {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let title = lines
        .iter()
        .take(TITLE_SCAN_LINES)
        .find(|l| looks_like_title(l))
        .map(|l| l.to_string());
    let author = find_author(&lines, title.as_deref());
    let year = publication_year(text, years);

    let mut candidate = RawCandidate {
        source: Source::Content,
        author,
        title,
        year,
        quality: 0.0,
    };
    if !candidate.is_empty() {
        candidate.quality = CONTENT_QUALITY;
    }
    candidate
}

fn looks_like_title(line: &str) -> bool {
    if line.chars().count() <= 5 || line.chars().count() > 160 {
        return false;
    }
    if NOT_A_TITLE_RE.is_match(line) || BY_LINE_RE.is_match(line) || line.contains('@') {
        return false;
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 4 || letters.iter().all(|c| c.is_uppercase()) {
        return false;
    }
    line.split_whitespace().enumerate().all(|(i, word)| {
        match word.chars().find(|c| c.is_alphanumeric()) {
            Some(c) if c.is_alphabetic() => c.is_uppercase() || (i > 0 && is_small_word(word)),
            _ => true,
        }
    })
}

fn find_author(lines: &[&str], title: Option<&str>) -> Option<String> {
    let head = &lines[..lines.len().min(AUTHOR_SCAN_LINES)];

    let labelled = head.iter().find_map(|l| {
        BY_LINE_RE
            .captures(l)
            .or_else(|| AUTHOR_LABEL_RE.captures(l))
            .map(|c| c[1].to_string())
    });
    let found = labelled.or_else(|| {
        head.iter()
            .filter(|l| Some(**l) != title)
            .filter(|l| l.len() > 5 && l.len() < 100)
            .find(|l| NAME_LIST_RE.is_match(l) && !l.ends_with(['.', ':', '?', '!']))
            .map(|l| l.to_string())
    })?;

    let cleaned = EMAIL_RE.replace_all(&found, "").trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Most frequent in-range year with publication wording nearby. Ties go to
/// the later year.
fn publication_year(text: &str, years: &YearsConfig) -> Option<i32> {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for (year, start, end) in years_with_offsets(text) {
        if !years.contains(year) {
            continue;
        }
        let lo = floor_boundary(text, start.saturating_sub(YEAR_CONTEXT_BYTES));
        let hi = ceil_boundary(text, (end + YEAR_CONTEXT_BYTES).min(text.len()));
        if YEAR_CONTEXT_RE.is_match(&text[lo..hi]) {
            *counts.entry(year).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(ya, ca), (yb, cb)| ca.cmp(cb).then(ya.cmp(yb)))
        .map(|(year, _)| year)
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
