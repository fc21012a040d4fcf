//! Candidate merging.
//!
//! Candidates are cleaned, out-of-range years are dropped, and each field is
//! taken from the highest-priority source whose value is not flagged low
//! quality. When every source is flagged, the highest-priority value is kept
//! rather than leaving the field unknown.

use std::collections::BTreeSet;

use crate::clean::{clean_candidate, comparable, is_placeholder};
use crate::config::{ScoringConfig, YearsConfig};
use crate::models::{MergedRecord, Provenance, RawCandidate, Source};
use crate::score;

/// Candidates whose own quality hint is below this are low quality in every field.
pub const LOW_QUALITY_CUTOFF: f64 = 0.3;

/// Merge priority: lower merges first. An AI candidate only appears during
/// re-merge and outranks local sources there.
fn priority(source: Source) -> u8 {
    match source {
        Source::Ai => 0,
        Source::Filename => 1,
        Source::Properties => 2,
        Source::Content => 3,
    }
}

pub struct Merger<'a> {
    years: &'a YearsConfig,
    scoring: &'a ScoringConfig,
}

impl<'a> Merger<'a> {
    pub fn new(years: &'a YearsConfig, scoring: &'a ScoringConfig) -> Self {
        Self { years, scoring }
    }

    /// Merge raw candidates for a file whose original stem is `stem`.
    pub fn merge(&self, candidates: &[RawCandidate], stem: &str) -> MergedRecord {
        let mut cleaned: Vec<RawCandidate> = candidates
            .iter()
            .map(|c| {
                let mut c = clean_candidate(c);
                if let Some(y) = c.year {
                    if !self.years.contains(y) {
                        tracing::debug!(source = %c.source, year = y, "dropping out-of-range year");
                        c.year = None;
                    }
                }
                c
            })
            .collect();
        cleaned.sort_by_key(|c| priority(c.source));

        let stem_key = comparable(stem);

        let author = pick(&cleaned, |c| c.author.as_ref(), |c, v| {
            low_quality_author(c, v)
        });
        let title = pick(&cleaned, |c| c.title.as_ref(), |c, v| {
            low_quality_title(c, v, &stem_key)
        });
        let year = pick(&cleaned, |c| c.year.as_ref(), |c, _| {
            c.quality < LOW_QUALITY_CUTOFF
        });

        let provenance = Provenance {
            author: agreeing(&cleaned, author.as_deref(), |c| c.author.as_deref()),
            title: agreeing(&cleaned, title.as_deref(), |c| c.title.as_deref()),
            year: cleaned
                .iter()
                .filter(|c| year.is_some() && c.year == year)
                .map(|c| c.source)
                .collect(),
        };

        let mut record = MergedRecord {
            author,
            title,
            year,
            confidence: 0.0,
            provenance,
        };
        record.confidence = score::score(&record, self.years, self.scoring);
        record
    }
}

fn pick<T, F, L>(sorted: &[RawCandidate], field: F, low_quality: L) -> Option<T>
where
    T: Clone,
    F: Fn(&RawCandidate) -> Option<&T>,
    L: Fn(&RawCandidate, &T) -> bool,
{
    let mut fallback: Option<&T> = None;
    for c in sorted {
        let Some(value) = field(c) else { continue };
        if !low_quality(c, value) {
            return Some(value.clone());
        }
        fallback.get_or_insert(value);
    }
    fallback.cloned()
}

fn low_quality_author(c: &RawCandidate, author: &str) -> bool {
    c.quality < LOW_QUALITY_CUTOFF || author.chars().count() <= 1 || is_placeholder(author)
}

fn low_quality_title(c: &RawCandidate, title: &str, stem_key: &str) -> bool {
    if c.quality < LOW_QUALITY_CUTOFF || title.chars().count() < 2 {
        return true;
    }
    // A title that is just the filename again carries no information,
    // unless the oracle confirmed it.
    c.source != Source::Ai && !stem_key.is_empty() && comparable(title) == stem_key
}

fn agreeing<F>(candidates: &[RawCandidate], chosen: Option<&str>, field: F) -> BTreeSet<Source>
where
    F: Fn(&RawCandidate) -> Option<&str>,
{
    let Some(chosen) = chosen.map(comparable) else {
        return BTreeSet::new();
    };
    candidates
        .iter()
        .filter(|c| field(c).map(comparable).as_deref() == Some(chosen.as_str()))
        .map(|c| c.source)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn years() -> YearsConfig {
        YearsConfig {
            min: 1500,
            max: 2030,
        }
    }

    fn cand(
        source: Source,
        author: Option<&str>,
        title: Option<&str>,
        year: Option<i32>,
        quality: f64,
    ) -> RawCandidate {
        RawCandidate {
            source,
            author: author.map(String::from),
            title: title.map(String::from),
            year,
            quality,
        }
    }

    #[test]
    fn filename_wins_over_properties() {
        let y = years();
        let s = ScoringConfig::default();
        let merger = Merger::new(&y, &s);
        let r = merger.merge(
            &[
                cand(Source::Properties, Some("Someone Else"), Some("Other Title"), Some(2001), 0.8),
                cand(Source::Filename, Some("Jane Doe"), Some("Real Title"), None, 0.7),
            ],
            "Jane Doe - Real Title",
        );
        assert_eq!(r.author.as_deref(), Some("Jane Doe"));
        assert_eq!(r.title.as_deref(), Some("Real Title"));
        assert_eq!(r.year, Some(2001));
        assert_eq!(r.provenance.year, [Source::Properties].into_iter().collect());
    }

    #[test]
    fn low_quality_filename_is_overridden() {
        let y = years();
        let s = ScoringConfig::default();
        let merger = Merger::new(&y, &s);
        let r = merger.merge(
            &[
                cand(Source::Filename, None, Some("scan_0042"), None, 0.1),
                cand(Source::Properties, Some("J"), None, None, 0.8),
                cand(Source::Content, Some("Jane Doe"), Some("Real Title"), None, 0.5),
            ],
            "scan_0042",
        );
        assert_eq!(r.title.as_deref(), Some("Real Title"));
        assert_eq!(r.author.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn flagged_value_kept_when_nothing_better() {
        let y = years();
        let s = ScoringConfig::default();
        let merger = Merger::new(&y, &s);
        let r = merger.merge(
            &[cand(Source::Filename, None, Some("notes"), None, 0.1)],
            "notes",
        );
        assert_eq!(r.title.as_deref(), Some("Notes"));
    }

    #[test]
    fn out_of_range_year_is_dropped_not_clamped() {
        let y = YearsConfig {
            min: 1900,
            max: 2020,
        };
        let s = ScoringConfig::default();
        let merger = Merger::new(&y, &s);
        let r = merger.merge(
            &[
                cand(Source::Filename, Some("Jane Doe"), Some("Future Book"), Some(2099), 0.9),
                cand(Source::Properties, None, None, Some(1850), 0.8),
            ],
            "x",
        );
        assert_eq!(r.year, None);
        assert!(r.provenance.year.is_empty());
    }

    #[test]
    fn provenance_counts_agreeing_sources() {
        let y = years();
        let s = ScoringConfig::default();
        let merger = Merger::new(&y, &s);
        let r = merger.merge(
            &[
                cand(Source::Filename, Some("S_or Dargo"), Some("Daily C++ Interview"), None, 0.7),
                cand(Source::Properties, Some("sandor dargo"), Some("DAILY C++ INTERVIEW"), Some(2023), 0.8),
            ],
            "S_or Dargo - Daily C++ Interview",
        );
        assert_eq!(r.author.as_deref(), Some("Sandor Dargo"));
        assert_eq!(r.provenance.author.len(), 2);
        assert_eq!(r.provenance.title.len(), 2);
        assert_eq!(r.provenance.year.len(), 1);
        assert!((r.confidence - (0.8 + 0.2 * 2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn ai_candidate_outranks_local_sources() {
        let y = years();
        let s = ScoringConfig::default();
        let merger = Merger::new(&y, &s);
        let r = merger.merge(
            &[
                cand(Source::Filename, Some("S Dargo"), Some("Interview"), None, 0.7),
                cand(Source::Ai, Some("Sandor Dargo"), Some("Daily C++ Interview"), Some(2023), 0.9),
            ],
            "S Dargo - Interview",
        );
        assert_eq!(r.author.as_deref(), Some("Sandor Dargo"));
        assert_eq!(r.title.as_deref(), Some("Daily C++ Interview"));
    }
}
