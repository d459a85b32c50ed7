use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// Verse counts for the 114 chapters in Hafs numbering, chapter 1 first.
const HAFS_VERSE_COUNTS: [u32; 114] = [
    7, 286, 200, 176, 120, 165, 206, 75, 129, 109, 123, 111, 43, 52, 99, 128, 111, 110, 98, 135,
    112, 78, 118, 64, 77, 227, 93, 88, 69, 60, 34, 30, 73, 54, 45, 83, 182, 88, 75, 85, 54, 53, 89,
    59, 37, 35, 38, 29, 18, 45, 60, 49, 62, 55, 78, 96, 29, 22, 24, 13, 14, 11, 11, 18, 12, 12, 30,
    52, 52, 44, 28, 28, 20, 56, 40, 31, 50, 40, 46, 42, 29, 19, 36, 25, 22, 17, 19, 26, 30, 20, 15,
    21, 11, 8, 8, 19, 5, 8, 8, 11, 11, 8, 3, 9, 5, 4, 7, 3, 6, 3, 5, 4, 5, 6,
];

const HAFS_NAMES: [&str; 114] = [
    "Al-Fatihah",
    "Al-Baqarah",
    "Al-Imran",
    "An-Nisa",
    "Al-Ma'idah",
    "Al-An'am",
    "Al-A'raf",
    "Al-Anfal",
    "At-Tawbah",
    "Yunus",
    "Hud",
    "Yusuf",
    "Ar-Ra'd",
    "Ibrahim",
    "Al-Hijr",
    "An-Nahl",
    "Al-Isra",
    "Al-Kahf",
    "Maryam",
    "Ta-Ha",
    "Al-Anbiya",
    "Al-Hajj",
    "Al-Mu'minun",
    "An-Nur",
    "Al-Furqan",
    "Ash-Shu'ara",
    "An-Naml",
    "Al-Qasas",
    "Al-Ankabut",
    "Ar-Rum",
    "Luqman",
    "As-Sajdah",
    "Al-Ahzab",
    "Saba",
    "Fatir",
    "Ya-Sin",
    "As-Saffat",
    "Sad",
    "Az-Zumar",
    "Ghafir",
    "Fussilat",
    "Ash-Shura",
    "Az-Zukhruf",
    "Ad-Dukhan",
    "Al-Jathiyah",
    "Al-Ahqaf",
    "Muhammad",
    "Al-Fath",
    "Al-Hujurat",
    "Qaf",
    "Adh-Dhariyat",
    "At-Tur",
    "An-Najm",
    "Al-Qamar",
    "Ar-Rahman",
    "Al-Waqi'ah",
    "Al-Hadid",
    "Al-Mujadilah",
    "Al-Hashr",
    "Al-Mumtahanah",
    "As-Saff",
    "Al-Jumu'ah",
    "Al-Munafiqun",
    "At-Taghabun",
    "At-Talaq",
    "At-Tahrim",
    "Al-Mulk",
    "Al-Qalam",
    "Al-Haqqah",
    "Al-Ma'arij",
    "Nuh",
    "Al-Jinn",
    "Al-Muzzammil",
    "Al-Muddaththir",
    "Al-Qiyamah",
    "Al-Insan",
    "Al-Mursalat",
    "An-Naba",
    "An-Nazi'at",
    "Abasa",
    "At-Takwir",
    "Al-Infitar",
    "Al-Mutaffifin",
    "Al-Inshiqaq",
    "Al-Buruj",
    "At-Tariq",
    "Al-A'la",
    "Al-Ghashiyah",
    "Al-Fajr",
    "Al-Balad",
    "Ash-Shams",
    "Al-Layl",
    "Ad-Duha",
    "Ash-Sharh",
    "At-Tin",
    "Al-Alaq",
    "Al-Qadr",
    "Al-Bayyinah",
    "Az-Zalzalah",
    "Al-Adiyat",
    "Al-Qari'ah",
    "At-Takathur",
    "Al-Asr",
    "Al-Humazah",
    "Al-Fil",
    "Quraysh",
    "Al-Ma'un",
    "Al-Kawthar",
    "Al-Kafirun",
    "An-Nasr",
    "Al-Masad",
    "Al-Ikhlas",
    "Al-Falaq",
    "An-Nas",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: u32,
    pub verse_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerseRange {
    pub from_chapter: u32,
    pub to_chapter: u32,
    pub from_verse: u32,
    pub to_verse: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Single,
    Ascending,
    Descending,
}

impl VerseRange {
    pub fn direction(&self) -> Direction {
        match self.from_chapter.cmp(&self.to_chapter) {
            std::cmp::Ordering::Equal => Direction::Single,
            std::cmp::Ordering::Less => Direction::Ascending,
            std::cmp::Ordering::Greater => Direction::Descending,
        }
    }
}

/// Whether ranges may run backwards through the catalog.
///
/// Same-chapter ranges are accepted in either verse order under both policies;
/// the policy only governs ranges that cross chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RangePolicy {
    #[default]
    Bidirectional,
    AscendingOnly,
}

impl RangePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "bidirectional" => Some(Self::Bidirectional),
            "ascendingOnly" => Some(Self::AscendingOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bidirectional => "bidirectional",
            Self::AscendingOnly => "ascendingOnly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    UnknownChapter {
        chapter: u32,
    },
    VerseOutOfRange {
        chapter: u32,
        verse: u32,
        verse_count: u32,
    },
    DescendingNotAllowed {
        from_chapter: u32,
        to_chapter: u32,
    },
}

impl RangeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownChapter { .. } => "unknown_chapter",
            Self::VerseOutOfRange { .. } => "verse_out_of_range",
            Self::DescendingNotAllowed { .. } => "descending_range_disallowed",
        }
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::UnknownChapter { chapter } => json!({ "chapter": chapter }),
            Self::VerseOutOfRange {
                chapter,
                verse,
                verse_count,
            } => json!({ "chapter": chapter, "verse": verse, "verseCount": verse_count }),
            Self::DescendingNotAllowed {
                from_chapter,
                to_chapter,
            } => json!({ "fromChapter": from_chapter, "toChapter": to_chapter }),
        }
    }
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownChapter { chapter } => write!(f, "chapter {} is not in the catalog", chapter),
            Self::VerseOutOfRange {
                chapter,
                verse,
                verse_count,
            } => write!(
                f,
                "verse {} is outside 1..={} for chapter {}",
                verse, verse_count, chapter
            ),
            Self::DescendingNotAllowed {
                from_chapter,
                to_chapter,
            } => write!(
                f,
                "descending range {} -> {} is not allowed by the current policy",
                from_chapter, to_chapter
            ),
        }
    }
}

impl std::error::Error for RangeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogError(pub String);

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CatalogError {}

/// Ordered, read-only chapter table. Verse positions are global ordinals
/// counted from the first chapter in id order.
#[derive(Debug, Clone)]
pub struct ChapterCatalog {
    chapters: BTreeMap<u32, Chapter>,
    // Verses in all chapters before the keyed one.
    offsets: BTreeMap<u32, u64>,
    total_verses: u64,
}

impl ChapterCatalog {
    pub fn standard() -> Self {
        let chapters = HAFS_VERSE_COUNTS
            .iter()
            .zip(HAFS_NAMES.iter())
            .enumerate()
            .map(|(i, (count, name))| Chapter {
                id: (i as u32) + 1,
                verse_count: *count,
                name: Some((*name).to_string()),
            });
        Self::build(chapters.map(|c| (c.id, c)).collect())
    }

    pub fn from_chapters<I>(chapters: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = Chapter>,
    {
        let mut map: BTreeMap<u32, Chapter> = BTreeMap::new();
        for c in chapters {
            if c.id == 0 {
                return Err(CatalogError("chapter id must be >= 1".to_string()));
            }
            if c.verse_count == 0 {
                return Err(CatalogError(format!(
                    "chapter {} must have at least one verse",
                    c.id
                )));
            }
            let id = c.id;
            if map.insert(id, c).is_some() {
                return Err(CatalogError(format!("duplicate chapter id {}", id)));
            }
        }
        if map.is_empty() {
            return Err(CatalogError("catalog must not be empty".to_string()));
        }
        Ok(Self::build(map))
    }

    fn build(chapters: BTreeMap<u32, Chapter>) -> Self {
        let mut offsets = BTreeMap::new();
        let mut running: u64 = 0;
        for (id, c) in &chapters {
            offsets.insert(*id, running);
            running += u64::from(c.verse_count);
        }
        Self {
            chapters,
            offsets,
            total_verses: running,
        }
    }

    pub fn chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.values()
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn total_verses(&self) -> u64 {
        self.total_verses
    }

    pub fn verse_count(&self, chapter: u32) -> Result<u32, RangeError> {
        self.chapters
            .get(&chapter)
            .map(|c| c.verse_count)
            .ok_or(RangeError::UnknownChapter { chapter })
    }

    fn check_verse(&self, chapter: u32, verse: u32) -> Result<u32, RangeError> {
        let verse_count = self.verse_count(chapter)?;
        if verse == 0 || verse > verse_count {
            return Err(RangeError::VerseOutOfRange {
                chapter,
                verse,
                verse_count,
            });
        }
        Ok(verse_count)
    }

    /// Sum of verse counts for chapters strictly between `lo` and `hi`.
    fn verses_between(&self, lo: u32, hi: u32) -> u64 {
        if hi <= lo {
            return 0;
        }
        self.chapters
            .range((Bound::Excluded(lo), Bound::Excluded(hi)))
            .map(|(_, c)| u64::from(c.verse_count))
            .sum()
    }

    /// 1-based position of a verse across the whole catalog.
    pub fn global_position(&self, chapter: u32, verse: u32) -> Result<u64, RangeError> {
        self.check_verse(chapter, verse)?;
        let offset = self
            .offsets
            .get(&chapter)
            .copied()
            .ok_or(RangeError::UnknownChapter { chapter })?;
        Ok(offset + u64::from(verse))
    }

    /// Inclusive count of verses traversed from the start to the end of `range`.
    pub fn count_verses(&self, range: &VerseRange) -> Result<u64, RangeError> {
        let from_count = self.check_verse(range.from_chapter, range.from_verse)?;
        let to_count = self.check_verse(range.to_chapter, range.to_verse)?;

        let from_verse = u64::from(range.from_verse);
        let to_verse = u64::from(range.to_verse);

        let total = match range.direction() {
            Direction::Single => from_verse.abs_diff(to_verse) + 1,
            Direction::Ascending => {
                (u64::from(from_count) - from_verse + 1)
                    + self.verses_between(range.from_chapter, range.to_chapter)
                    + to_verse
            }
            Direction::Descending => {
                from_verse
                    + self.verses_between(range.to_chapter, range.from_chapter)
                    + (u64::from(to_count) - to_verse + 1)
            }
        };
        Ok(total)
    }

    /// Like [`count_verses`](Self::count_verses), but rejects cross-chapter
    /// descending ranges when the policy says so.
    pub fn count_verses_with_policy(
        &self,
        range: &VerseRange,
        policy: RangePolicy,
    ) -> Result<u64, RangeError> {
        if policy == RangePolicy::AscendingOnly && range.direction() == Direction::Descending {
            // Validate references first so a bad chapter still reports as such.
            self.check_verse(range.from_chapter, range.from_verse)?;
            self.check_verse(range.to_chapter, range.to_verse)?;
            return Err(RangeError::DescendingNotAllowed {
                from_chapter: range.from_chapter,
                to_chapter: range.to_chapter,
            });
        }
        self.count_verses(range)
    }

    /// Inclusive `(low, high)` global positions covered by `range`.
    pub fn span(&self, range: &VerseRange) -> Result<(u64, u64), RangeError> {
        let a = self.global_position(range.from_chapter, range.from_verse)?;
        let b = self.global_position(range.to_chapter, range.to_verse)?;
        Ok((a.min(b), a.max(b)))
    }

    /// Maps a global position back to `(chapter, verse)`.
    pub fn locate(&self, position: u64) -> Option<(u32, u32)> {
        if position == 0 || position > self.total_verses {
            return None;
        }
        let (id, offset) = self
            .offsets
            .range(..)
            .rev()
            .find(|(_, off)| **off < position)?;
        Some((*id, (position - offset) as u32))
    }
}

impl Default for ChapterCatalog {
    fn default() -> Self {
        Self::standard()
    }
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
    fn standard_catalog_shape() {
        let cat = ChapterCatalog::standard();
        assert_eq!(cat.len(), 114);
        assert_eq!(cat.total_verses(), 6236);
        assert_eq!(cat.verse_count(2), Ok(286));
        assert_eq!(cat.verse_count(115), Err(RangeError::UnknownChapter { chapter: 115 }));
    }

    #[test]
    fn single_verse_counts_one() {
        let cat = ChapterCatalog::standard();
        for c in cat.chapters().map(|c| (c.id, c.verse_count)).collect::<Vec<_>>() {
            assert_eq!(cat.count_verses(&range(c.0, c.0, 1, 1)), Ok(1));
            assert_eq!(cat.count_verses(&range(c.0, c.0, c.1, c.1)), Ok(1));
        }
    }

    #[test]
    fn same_chapter_is_direction_symmetric() {
        let cat = ChapterCatalog::standard();
        assert_eq!(cat.count_verses(&range(2, 2, 10, 20)), Ok(11));
        assert_eq!(cat.count_verses(&range(2, 2, 20, 10)), Ok(11));
        assert_eq!(cat.count_verses(&range(2, 2, 1, 286)), Ok(286));
    }

    #[test]
    fn ascending_and_descending_mirror() {
        let cat = ChapterCatalog::standard();
        let v1 = cat.verse_count(1).unwrap_or(0);
        let v2 = u64::from(cat.verse_count(2).unwrap_or(0));
        let asc = cat.count_verses(&range(1, 3, v1, 5));
        assert_eq!(asc, Ok(1 + v2 + 5));
        let desc = cat.count_verses(&range(3, 1, 5, v1));
        assert_eq!(desc, asc);
    }

    #[test]
    fn whole_catalog_ascending() {
        let cat = ChapterCatalog::standard();
        assert_eq!(cat.count_verses(&range(1, 114, 1, 6)), Ok(6236));
        assert_eq!(cat.count_verses(&range(114, 1, 6, 1)), Ok(6236));
    }

    #[test]
    fn count_matches_global_positions() {
        let cat = ChapterCatalog::standard();
        for r in [
            range(1, 3, 4, 10),
            range(3, 1, 10, 4),
            range(18, 18, 110, 1),
            range(67, 114, 12, 3),
            range(114, 78, 2, 40),
        ] {
            let (lo, hi) = cat.span(&r).expect("span");
            assert_eq!(cat.count_verses(&r), Ok(hi - lo + 1), "range {:?}", r);
        }
    }

    #[test]
    fn invalid_references_are_rejected() {
        let cat = ChapterCatalog::standard();
        assert_eq!(
            cat.count_verses(&range(0, 2, 1, 1)),
            Err(RangeError::UnknownChapter { chapter: 0 })
        );
        assert_eq!(
            cat.count_verses(&range(1, 1, 8, 1)),
            Err(RangeError::VerseOutOfRange {
                chapter: 1,
                verse: 8,
                verse_count: 7
            })
        );
        assert_eq!(
            cat.count_verses(&range(1, 2, 0, 1)).map_err(|e| e.code()),
            Err("verse_out_of_range")
        );
    }

    #[test]
    fn ascending_only_policy_rejects_cross_chapter_descent() {
        let cat = ChapterCatalog::standard();
        let r = range(3, 1, 5, 7);
        assert_eq!(
            cat.count_verses_with_policy(&r, RangePolicy::AscendingOnly),
            Err(RangeError::DescendingNotAllowed {
                from_chapter: 3,
                to_chapter: 1
            })
        );
        assert_eq!(
            cat.count_verses_with_policy(&range(2, 2, 9, 3), RangePolicy::AscendingOnly),
            Ok(7)
        );
        assert!(cat
            .count_verses_with_policy(&r, RangePolicy::Bidirectional)
            .is_ok());
    }

    #[test]
    fn custom_catalog_with_gaps() {
        let cat = ChapterCatalog::from_chapters(vec![
            Chapter { id: 1, verse_count: 3, name: None },
            Chapter { id: 4, verse_count: 5, name: None },
            Chapter { id: 9, verse_count: 2, name: None },
        ])
        .expect("catalog");
        assert_eq!(cat.count_verses(&range(1, 9, 2, 1)), Ok(2 + 5 + 1));
        assert_eq!(cat.locate(4), Some((4, 1)));
        assert_eq!(cat.locate(10), Some((9, 2)));
        assert_eq!(cat.locate(11), None);
        assert!(ChapterCatalog::from_chapters(vec![]).is_err());
        assert!(ChapterCatalog::from_chapters(vec![
            Chapter { id: 2, verse_count: 1, name: None },
            Chapter { id: 2, verse_count: 4, name: None },
        ])
        .is_err());
    }

    #[test]
    fn whole_chapter_counts_for_every_chapter() {
        let cat = ChapterCatalog::standard();
        for (id, n) in cat.chapters().map(|c| (c.id, c.verse_count)).collect::<Vec<_>>() {
            let mid = (n + 1) / 2;
            assert_eq!(cat.count_verses(&range(id, id, 1, n)), Ok(u64::from(n)));
            assert_eq!(
                cat.count_verses(&range(id, id, 1, mid)),
                cat.count_verses(&range(id, id, mid, 1))
            );
        }
    }

    #[test]
    fn adjacent_chapter_boundaries_count_two() {
        let cat = ChapterCatalog::standard();
        for c in 1..114u32 {
            let last = cat.verse_count(c).expect("chapter in catalog");
            let asc = cat.count_verses(&range(c, c + 1, last, 1));
            assert_eq!(asc, Ok(2), "chapter {} -> {}", c, c + 1);
            assert_eq!(cat.count_verses(&range(c + 1, c, 1, last)), asc);
        }
    }
}
