use crate::quran::{ChapterCatalog, RangeError, VerseRange};
use serde::Serialize;
use std::collections::BTreeMap;

/// 1-decimal rounding used for percentages shown in charts:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<RangeError> for CalcError {
    fn from(e: RangeError) -> Self {
        CalcError::new(e.code(), e.to_string()).with_details(e.details())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackingKind {
    Memorization,
    Revision,
}

impl TrackingKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memorization" => Some(Self::Memorization),
            "revision" => Some(Self::Revision),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memorization => "memorization",
            Self::Revision => "revision",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterCoverage {
    pub chapter: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub covered: u64,
    pub verse_count: u32,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressModel {
    pub entry_count: usize,
    pub total_verses_recorded: u64,
    pub unique_verses_covered: u64,
    pub catalog_verses: u64,
    pub percent_covered: f64,
    pub chapters: Vec<ChapterCoverage>,
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_off_1_decimal(100.0 * (part as f64) / (whole as f64))
}

/// Merges inclusive intervals; input need not be sorted.
fn merge_spans(mut spans: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    spans.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(spans.len());
    for (lo, hi) in spans {
        match merged.last_mut() {
            Some(last) if lo <= last.1.saturating_add(1) => {
                last.1 = last.1.max(hi);
            }
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

/// Coverage summary for a set of recorded ranges. Overlapping ranges count
/// once in `unique_verses_covered` and every time in `total_verses_recorded`.
pub fn memorization_progress<'a, I>(
    catalog: &ChapterCatalog,
    ranges: I,
) -> Result<ProgressModel, CalcError>
where
    I: IntoIterator<Item = &'a VerseRange>,
{
    let mut spans = Vec::new();
    let mut entry_count = 0usize;
    let mut total_recorded: u64 = 0;
    for r in ranges {
        entry_count += 1;
        total_recorded += catalog.count_verses(r)?;
        spans.push(catalog.span(r)?);
    }

    let merged = merge_spans(spans);
    let unique: u64 = merged.iter().map(|(lo, hi)| hi - lo + 1).sum();

    let mut per_chapter: BTreeMap<u32, u64> = BTreeMap::new();
    for (lo, hi) in &merged {
        let (Some((c_lo, _)), Some((c_hi, _))) = (catalog.locate(*lo), catalog.locate(*hi)) else {
            continue;
        };
        for ch in catalog.chapters().filter(|c| c.id >= c_lo && c.id <= c_hi) {
            let first = catalog.global_position(ch.id, 1)?;
            let last = first + u64::from(ch.verse_count) - 1;
            let overlap = hi.min(&last).saturating_sub(*lo.max(&first)) + 1;
            *per_chapter.entry(ch.id).or_insert(0) += overlap;
        }
    }

    let chapters = catalog
        .chapters()
        .filter_map(|c| {
            per_chapter.get(&c.id).map(|covered| ChapterCoverage {
                chapter: c.id,
                name: c.name.clone(),
                covered: *covered,
                verse_count: c.verse_count,
                percent: percent(*covered, u64::from(c.verse_count)),
            })
        })
        .collect();

    Ok(ProgressModel {
        entry_count,
        total_verses_recorded: total_recorded,
        unique_verses_covered: unique,
        catalog_verses: catalog.total_verses(),
        percent_covered: percent(unique, catalog.total_verses()),
        chapters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(fc: u32, tc: u32, fv: u32, tv: u32) -> VerseRange {
        VerseRange {
            from_chapter: fc,
            to_chapter: tc,
            from_verse: fv,
            to_verse: tv,
        }
    }

    #[test]
    fn round_off_half_up() {
        assert_eq!(round_off_1_decimal(0.0), 0.0);
        assert_eq!(round_off_1_decimal(3.54), 3.5);
        assert_eq!(round_off_1_decimal(3.55), 3.6);
        assert_eq!(round_off_1_decimal(35.6818), 35.7);
    }

    #[test]
    fn overlapping_ranges_count_once() {
        let cat = ChapterCatalog::standard();
        let ranges = vec![range(2, 2, 1, 10), range(2, 2, 5, 20), range(2, 2, 21, 21)];
        let p = memorization_progress(&cat, &ranges).expect("progress");
        assert_eq!(p.entry_count, 3);
        assert_eq!(p.total_verses_recorded, 10 + 16 + 1);
        assert_eq!(p.unique_verses_covered, 21);
        assert_eq!(p.chapters.len(), 1);
        assert_eq!(p.chapters[0].chapter, 2);
        assert_eq!(p.chapters[0].covered, 21);
        assert_eq!(p.chapters[0].percent, 7.3);
    }

    #[test]
    fn cross_chapter_coverage_splits_per_chapter() {
        let cat = ChapterCatalog::standard();
        // Descending from An-Nas back into Al-Falaq.
        let ranges = vec![range(114, 113, 6, 3)];
        let p = memorization_progress(&cat, &ranges).expect("progress");
        assert_eq!(p.unique_verses_covered, 3 + 6);
        let by_id: Vec<(u32, u64)> = p.chapters.iter().map(|c| (c.chapter, c.covered)).collect();
        assert_eq!(by_id, vec![(113, 3), (114, 6)]);
        assert_eq!(p.chapters[1].percent, 100.0);
    }

    #[test]
    fn whole_catalog_is_one_hundred_percent() {
        let cat = ChapterCatalog::standard();
        let ranges = vec![range(1, 114, 1, 6)];
        let p = memorization_progress(&cat, &ranges).expect("progress");
        assert_eq!(p.unique_verses_covered, 6236);
        assert_eq!(p.percent_covered, 100.0);
        assert_eq!(p.chapters.len(), 114);
    }

    #[test]
    fn empty_progress_is_zero() {
        let cat = ChapterCatalog::standard();
        let p = memorization_progress(&cat, &[]).expect("progress");
        assert_eq!(p.entry_count, 0);
        assert_eq!(p.percent_covered, 0.0);
        assert!(p.chapters.is_empty());
    }

    #[test]
    fn invalid_range_maps_to_calc_error() {
        let cat = ChapterCatalog::standard();
        let ranges = vec![range(1, 1, 1, 9)];
        let e = memorization_progress(&cat, &ranges).expect_err("invalid");
        assert_eq!(e.code, "verse_out_of_range");
        assert!(e.details.is_some());
    }
}
