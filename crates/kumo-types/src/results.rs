//! Results of the heavier VFS operations.

use serde::{Deserialize, Serialize};

/// Matching lines found in one file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMatches {
    pub path: String,
    pub lines: Vec<String>,
}

/// Result of `grep`. The shape follows what the caller asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GrepResult {
    /// `-c`: total match count across all files.
    Count(u64),
    /// `-l`: inputs with at least one match.
    Files(Vec<String>),
    /// Per-file matching lines.
    Matches(Vec<FileMatches>),
}

impl GrepResult {
    /// Merge results of the same shape, e.g. from several backends.
    ///
    /// Mismatched shapes keep `self`.
    pub fn merge(self, other: GrepResult) -> GrepResult {
        match (self, other) {
            (GrepResult::Count(a), GrepResult::Count(b)) => GrepResult::Count(a + b),
            (GrepResult::Files(mut a), GrepResult::Files(b)) => {
                a.extend(b);
                GrepResult::Files(a)
            }
            (GrepResult::Matches(mut a), GrepResult::Matches(b)) => {
                a.extend(b);
                GrepResult::Matches(a)
            }
            (first, _) => first,
        }
    }

    /// True when nothing matched.
    pub fn is_empty(&self) -> bool {
        match self {
            GrepResult::Count(n) => *n == 0,
            GrepResult::Files(f) => f.is_empty(),
            GrepResult::Matches(m) => m.iter().all(|f| f.lines.is_empty()),
        }
    }
}

/// Result of `cp`: every destination path written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOutcome {
    pub copied: Vec<String>,
}

impl CopyOutcome {
    pub fn merge(mut self, other: CopyOutcome) -> CopyOutcome {
        self.copied.extend(other.copied);
        self
    }
}

/// Result of `gzip` / `gunzip`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressResult {
    /// Paths written. Empty when offloaded without log collection.
    pub outputs: Vec<String>,
    /// Job id when the work ran on the data-parallel provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl CompressResult {
    pub fn merge(mut self, other: CompressResult) -> CompressResult {
        self.outputs.extend(other.outputs);
        self.job_id = self.job_id.or(other.job_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_counts() {
        let merged = GrepResult::Count(2).merge(GrepResult::Count(3));
        assert_eq!(merged, GrepResult::Count(5));
    }

    #[test]
    fn test_merge_matches_and_emptiness() {
        let a = GrepResult::Matches(vec![FileMatches {
            path: "/a".into(),
            lines: vec![],
        }]);
        assert!(a.is_empty());
        let b = GrepResult::Matches(vec![FileMatches {
            path: "/b".into(),
            lines: vec!["hit".into()],
        }]);
        let merged = a.merge(b);
        assert!(!merged.is_empty());
        match merged {
            GrepResult::Matches(m) => assert_eq!(m.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_merge_keeps_first() {
        let merged = GrepResult::Count(1).merge(GrepResult::Files(vec!["/x".into()]));
        assert_eq!(merged, GrepResult::Count(1));
    }
}
