//! Filename synthesis.
//!
//! Renders a [`MergedRecord`] into a filename in one of two styles:
//!
//! | Style      | Example                                       |
//! |------------|-----------------------------------------------|
//! | `friendly` | `Sandor_Dargo_Daily_C++_Interview_2023.epub`  |
//! | `display`  | `Sandor Dargo - Daily C++ Interview (2023).epub` |
//!
//! Unknown fields use the configured sentinels. Every component is
//! sanitized for common filesystems, the whole name is bounded to
//! `max_len` bytes (the title gives way first, the extension never does),
//! and [`resolve_collision`] picks a free ` (n)` variant in the target
//! directory.

use std::path::{Path, PathBuf};

use crate::config::{NamingConfig, NamingStyle};
use crate::error::FileOpError;
use crate::models::MergedRecord;

/// Stem used when sanitizing leaves nothing.
pub const FALLBACK_STEM: &str = "Untitled";

const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Full filename (stem plus `.ext`) for `record`.
pub fn render(record: &MergedRecord, ext: &str, config: &NamingConfig) -> String {
    let author = component(record.author.as_deref(), &config.unknown_author);
    let mut title = component(record.title.as_deref(), &config.unknown_title);
    let year = match record.year {
        Some(y) => y.to_string(),
        None => clean_component(&config.unknown_year),
    };

    let ext_len = if ext.is_empty() { 0 } else { ext.len() + 1 };
    let budget = config.max_len.saturating_sub(ext_len).max(1);

    let mut stem = assemble(config.style, &author, &title, &year);
    if stem.len() > budget {
        let overflow = stem.len() - budget;
        let keep = title.len().saturating_sub(overflow);
        title = truncate_bytes(&title, keep).trim_end().to_string();
        stem = assemble(config.style, &author, &title, &year);
        if stem.len() > budget {
            stem = truncate_bytes(&stem, budget).to_string();
        }
    }

    let stem = finalize(&stem);
    if ext.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, ext)
    }
}

/// Pick a free path for `name` in `dir`, trying ` (1)` up to
/// `collision_budget`. The file being renamed (`original`) does not count as
/// a collision. The stem is shortened so a suffixed name still fits
/// `max_len`.
pub fn resolve_collision(
    dir: &Path,
    name: &str,
    original: &Path,
    config: &NamingConfig,
) -> Result<PathBuf, FileOpError> {
    let target = dir.join(name);
    if is_free(&target, original) {
        return Ok(target);
    }

    let budget = config.collision_budget;
    let (stem, ext) = split_name(name);
    let ext_len = ext.map(|e| e.len() + 1).unwrap_or(0);
    for n in 1..=budget {
        let suffix = format!(" ({})", n);
        let room = config.max_len.saturating_sub(ext_len + suffix.len()).max(1);
        let stem = truncate_bytes(stem, room).trim_end_matches([' ', '_', '.']);
        let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };
        let candidate = match ext {
            Some(ext) => dir.join(format!("{}{}.{}", stem, suffix, ext)),
            None => dir.join(format!("{}{}", stem, suffix)),
        };
        if is_free(&candidate, original) {
            tracing::debug!(target = %candidate.display(), attempt = n, "resolved name collision");
            return Ok(candidate);
        }
    }
    Err(FileOpError::CollisionBudgetExhausted { target, budget })
}

fn is_free(candidate: &Path, original: &Path) -> bool {
    // symlink_metadata so a dangling link still counts as taken
    candidate.symlink_metadata().is_err() || same_file(candidate, original)
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (a.metadata(), b.metadata()) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

fn component(value: Option<&str>, sentinel: &str) -> String {
    let cleaned = value.map(clean_component).unwrap_or_default();
    if cleaned.is_empty() {
        clean_component(sentinel)
    } else {
        cleaned
    }
}

/// Illegal and control characters become spaces; whitespace collapses.
fn clean_component(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if ILLEGAL.contains(&c) || c.is_control() { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn assemble(style: NamingStyle, author: &str, title: &str, year: &str) -> String {
    match style {
        NamingStyle::Friendly => {
            let joined = format!("{} {} {}", author, title, year).replace(',', " ");
            let mut out = String::with_capacity(joined.len());
            for word in joined.split(|c: char| c.is_whitespace() || c == '_') {
                if word.is_empty() {
                    continue;
                }
                if !out.is_empty() {
                    out.push('_');
                }
                out.push_str(word);
            }
            out
        }
        NamingStyle::Display => {
            let mut out = match (author.is_empty(), title.is_empty()) {
                (false, false) => format!("{} - {}", author, title),
                (true, _) => title.to_string(),
                (false, true) => author.to_string(),
            };
            if !year.is_empty() {
                out.push_str(&format!(" ({})", year));
            }
            out
        }
    }
}

fn finalize(stem: &str) -> String {
    let trimmed = stem
        .trim_start_matches([' ', '_'])
        .trim_end_matches(['.', ' ', '_']);
    if trimmed.is_empty() {
        return FALLBACK_STEM.to_string();
    }
    let device = trimmed.split('.').next().unwrap_or(trimmed);
    if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(device)) {
        return format!("_{}", trimmed);
    }
    trimmed.to_string()
}

/// Longest prefix of `s` no longer than `max` bytes that ends on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(author: Option<&str>, title: Option<&str>, year: Option<i32>) -> MergedRecord {
        MergedRecord {
            author: author.map(String::from),
            title: title.map(String::from),
            year,
            ..Default::default()
        }
    }

    #[test]
    fn friendly_style() {
        let r = record(Some("Sandor Dargo"), Some("Daily C++ Interview"), Some(2023));
        assert_eq!(
            render(&r, "epub", &NamingConfig::default()),
            "Sandor_Dargo_Daily_C++_Interview_2023.epub"
        );
    }

    #[test]
    fn display_style_and_sentinels() {
        let config = NamingConfig {
            style: NamingStyle::Display,
            ..Default::default()
        };
        let r = record(None, Some("Structure and Interpretation"), None);
        assert_eq!(
            render(&r, "pdf", &config),
            "Unknown Author - Structure and Interpretation.pdf"
        );
        let r = record(Some("Jane Doe"), None, Some(1999));
        assert_eq!(render(&r, "pdf", &config), "Jane Doe - Untitled (1999).pdf");
    }

    #[test]
    fn unknown_year_sentinel_when_configured() {
        let config = NamingConfig {
            unknown_year: "n.d".into(),
            ..Default::default()
        };
        let r = record(Some("Jane Doe"), Some("Notes"), None);
        assert_eq!(render(&r, "pdf", &config), "Jane_Doe_Notes_n.d.pdf");
    }

    #[test]
    fn friendly_drops_commas_in_author_lists() {
        let r = record(Some("Harold Abelson, Gerald Jay Sussman"), Some("SICP"), None);
        assert_eq!(
            render(&r, "pdf", &NamingConfig::default()),
            "Harold_Abelson_Gerald_Jay_Sussman_SICP.pdf"
        );
    }

    #[test]
    fn illegal_characters_removed() {
        let r = record(Some("A/B"), Some("What? A: \"Guide\" <to> *stars*|\u{7}"), Some(2001));
        let name = render(&r, "pdf", &NamingConfig::default());
        assert_eq!(name, "A_B_What_A_Guide_to_stars_2001.pdf");
    }

    fn assert_safe_name(name: &str, ext: &str) {
        let stem = name
            .strip_suffix(&format!(".{}", ext))
            .unwrap_or_else(|| panic!("{:?} lost its extension", name));
        assert!(!stem.is_empty(), "{:?}", name);
        assert!(
            !stem.chars().any(|c| ILLEGAL.contains(&c) || c.is_control()),
            "{:?}",
            name
        );
        assert!(!stem.ends_with('.') && !stem.ends_with(' '), "{:?}", name);
        let device = stem.split('.').next().unwrap_or(stem);
        assert!(
            !RESERVED.iter().any(|r| r.eq_ignore_ascii_case(device)),
            "{:?}",
            name
        );
    }

    #[test]
    fn rendered_names_are_never_illegal_or_empty() {
        let inputs = [
            "", " ", "...", "___", "\u{0}\u{1f}", "<>:\"/\\|?*", "con", "LPT1.backup", "a  b",
            "trailing. . .", "ünïcödé: títle", "\t\nnew\rline", " - ", ",,,",
        ];
        let blank_sentinels = NamingConfig {
            unknown_author: String::new(),
            unknown_title: String::new(),
            ..Default::default()
        };
        let configs = [
            NamingConfig::default(),
            NamingConfig {
                style: NamingStyle::Display,
                ..Default::default()
            },
            blank_sentinels.clone(),
            NamingConfig {
                style: NamingStyle::Display,
                ..blank_sentinels.clone()
            },
        ];

        for config in &configs {
            assert_safe_name(&render(&record(None, None, None), "pdf", config), "pdf");
            for input in inputs {
                for r in [
                    record(Some(input), Some(input), None),
                    record(None, Some(input), None),
                    record(Some(input), None, Some(2001)),
                ] {
                    assert_safe_name(&render(&r, "pdf", config), "pdf");
                }
            }
        }

        assert_eq!(render(&record(None, None, None), "pdf", &blank_sentinels), "Untitled.pdf");
        assert_eq!(
            render(&record(None, Some("con"), None), "pdf", &blank_sentinels),
            "_con.pdf"
        );
        assert_eq!(
            render(&record(None, Some("LPT1.backup"), None), "epub", &blank_sentinels),
            "_LPT1.backup.epub"
        );
    }

    #[test]
    fn long_titles_truncate_on_char_boundary() {
        let config = NamingConfig {
            max_len: 40,
            ..Default::default()
        };
        let r = record(Some("Jane Doe"), Some(&"é".repeat(60)), Some(2020));
        let name = render(&r, "epub", &config);
        assert!(name.len() <= 40, "{} bytes", name.len());
        assert!(name.starts_with("Jane_Doe_é"));
        assert!(name.ends_with("_2020.epub"));
    }

    #[test]
    fn collision_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("scan.pdf");
        std::fs::write(&original, b"x").unwrap();
        std::fs::write(dir.path().join("Book.pdf"), b"y").unwrap();

        let target =
            resolve_collision(dir.path(), "Book.pdf", &original, &NamingConfig::default()).unwrap();
        assert_eq!(target, dir.path().join("Book (1).pdf"));
    }

    #[test]
    fn own_name_is_not_a_collision() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("Book.pdf");
        std::fs::write(&original, b"x").unwrap();

        let target =
            resolve_collision(dir.path(), "Book.pdf", &original, &NamingConfig::default()).unwrap();
        assert_eq!(target, original);
    }

    #[test]
    fn budget_exhaustion_is_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("scan.pdf");
        std::fs::write(&original, b"x").unwrap();
        for name in ["Book.pdf", "Book (1).pdf", "Book (2).pdf"] {
            std::fs::write(dir.path().join(name), b"y").unwrap();
        }

        let config = NamingConfig {
            collision_budget: 2,
            ..Default::default()
        };
        let err = resolve_collision(dir.path(), "Book.pdf", &original, &config).unwrap_err();
        assert!(matches!(err, FileOpError::CollisionBudgetExhausted { budget: 2, .. }));
    }

    #[test]
    fn collision_counter_stays_within_max_len() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("scan.pdf");
        std::fs::write(&original, b"x").unwrap();

        let config = NamingConfig {
            max_len: 60,
            ..Default::default()
        };
        let r = record(Some("Jane Doe"), Some(&"Long title ".repeat(20)), Some(2020));
        let name = render(&r, "pdf", &config);
        assert_eq!(name.len(), 60);
        std::fs::write(dir.path().join(&name), b"y").unwrap();

        let target = resolve_collision(dir.path(), &name, &original, &config).unwrap();
        let target_name = target.file_name().unwrap().to_string_lossy().into_owned();
        assert!(target_name.len() <= 60, "{} is {} bytes", target_name, target_name.len());
        assert!(target_name.starts_with("Jane_Doe_Long_title"));
        assert!(target_name.ends_with(" (1).pdf"), "{}", target_name);
    }
}
