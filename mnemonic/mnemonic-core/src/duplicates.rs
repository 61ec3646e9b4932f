//! Near-duplicate detection from content hash and metadata equality

use std::collections::BTreeMap;

use crate::model::{FileId, FileRecord};

/// How closely a pool entry matches. Every level implies equal content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Similarity {
    /// Name and narration equal.
    Exact,
    SameName,
    SameNarration,
    ContentOnly,
}

impl Similarity {
    pub fn score(self) -> f64 {
        match self {
            Similarity::Exact => 1.0,
            Similarity::SameName => 0.90,
            Similarity::SameNarration => 0.85,
            Similarity::ContentOnly => 0.75,
        }
    }
}

/// The file being checked against the pool.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub hash: &'a str,
    pub name: &'a str,
    pub narration: &'a str,
}

impl<'a> From<&'a FileRecord> for Candidate<'a> {
    fn from(record: &'a FileRecord) -> Self {
        Self {
            hash: &record.hash,
            name: &record.name,
            narration: &record.narration,
        }
    }
}

pub struct DuplicateScorer;

impl DuplicateScorer {
    /// `None` when the content differs.
    pub fn classify(candidate: &Candidate<'_>, entry: &Candidate<'_>) -> Option<Similarity> {
        if candidate.hash != entry.hash {
            return None;
        }
        let same_name = candidate.name == entry.name;
        let same_narration = candidate.narration == entry.narration;
        Some(match (same_name, same_narration) {
            (true, true) => Similarity::Exact,
            (true, false) => Similarity::SameName,
            (false, true) => Similarity::SameNarration,
            (false, false) => Similarity::ContentOnly,
        })
    }

    pub fn score(candidate: &Candidate<'_>, entry: &Candidate<'_>) -> Option<f64> {
        Self::classify(candidate, entry).map(Similarity::score)
    }

    /// Score every pool entry except `exclude`. Non-matching entries are left out.
    pub fn find<'p>(
        candidate: &Candidate<'_>,
        pool: impl IntoIterator<Item = &'p FileRecord>,
        exclude: Option<FileId>,
    ) -> BTreeMap<FileId, f64> {
        pool.into_iter()
            .filter(|record| Some(record.id) != exclude)
            .filter_map(|record| {
                Self::score(candidate, &Candidate::from(record)).map(|score| (record.id, score))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlobLocation, StoragePath};
    use chrono::Utc;

    fn record(id: FileId, hash: &str, name: &str, narration: &str) -> FileRecord {
        FileRecord {
            id,
            name: name.into(),
            narration: narration.into(),
            size: 3,
            hash: hash.into(),
            location: BlobLocation {
                assumed_name: "entry".into(),
                archive_name: "a.mfc".into(),
                directory: StoragePath::parse("b/0/v0").unwrap(),
            },
            password: "pw".into(),
            saved_at: Utc::now(),
            deleted_at: None,
            last_version: 0,
            briefcase: 1,
        }
    }

    #[test]
    fn score_levels() {
        let candidate = Candidate { hash: "h", name: "a.txt", narration: "notes" };
        let cases = [
            (Candidate { hash: "h", name: "a.txt", narration: "notes" }, Some(1.0)),
            (Candidate { hash: "h", name: "a.txt", narration: "other" }, Some(0.90)),
            (Candidate { hash: "h", name: "b.txt", narration: "notes" }, Some(0.85)),
            (Candidate { hash: "h", name: "b.txt", narration: "other" }, Some(0.75)),
            (Candidate { hash: "x", name: "a.txt", narration: "notes" }, None),
        ];
        for (entry, expected) in cases {
            assert_eq!(DuplicateScorer::score(&candidate, &entry), expected);
        }
    }

    #[test]
    fn find_omits_mismatches_and_self() {
        let pool = vec![
            record(1, "h", "a.txt", "n"),
            record(2, "h", "a.txt", "n"),
            record(3, "h", "c.txt", "z"),
            record(4, "other", "a.txt", "n"),
        ];
        let me = &pool[0];
        let found = DuplicateScorer::find(&Candidate::from(me), &pool, Some(me.id));

        assert_eq!(found.len(), 2);
        assert_eq!(found[&2], 1.0);
        assert_eq!(found[&3], 0.75);
        assert!(!found.contains_key(&4));
    }
}
