//! Content transforms shared by backends: regex search and gzip.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use kumo_types::{FileMatches, GrepResult};
use regex::{Regex, RegexBuilder};

use crate::vfs::{GrepOptions, VfsError, VfsResult};

/// Suffix written by `gzip` and required by `gunzip`.
pub const GZ_SUFFIX: &str = ".gz";

/// Compile a search pattern.
///
/// An invalid regex falls back to a literal search.
pub fn build_matcher(pattern: &str, ignore_case: bool) -> VfsResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(ignore_case)
                .build()
        })
        .map_err(|e| VfsError::other(format!("invalid pattern: {e}")))
}

/// Lines of `data` matching `re`, decoded lossily.
pub fn matching_lines(re: &Regex, data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .lines()
        .filter(|line| re.is_match(line))
        .map(str::to_string)
        .collect()
}

/// Reduce per-file matches to the shape the caller asked for.
///
/// Per-file lists fail with NoMatches when no file matched anything.
pub fn shape_grep(opts: &GrepOptions, pattern: &str, per_file: Vec<FileMatches>) -> VfsResult<GrepResult> {
    if opts.count_only {
        return Ok(GrepResult::Count(
            per_file.iter().map(|f| f.lines.len() as u64).sum(),
        ));
    }
    if opts.files_only {
        return Ok(GrepResult::Files(
            per_file
                .into_iter()
                .filter(|f| !f.lines.is_empty())
                .map(|f| f.path)
                .collect(),
        ));
    }
    if per_file.iter().all(|f| f.lines.is_empty()) {
        return Err(VfsError::NoMatches(pattern.to_string()));
    }
    Ok(GrepResult::Matches(per_file))
}

pub fn gzip_bytes(data: &[u8]) -> VfsResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gunzip_bytes(data: &[u8]) -> VfsResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Output name for `gunzip`, or a validation error when `.gz` is missing.
pub fn strip_gz(path: &str) -> VfsResult<&str> {
    match path.strip_suffix(GZ_SUFFIX) {
        Some(stem) if !stem.is_empty() && !stem.ends_with('/') => Ok(stem),
        _ => Err(VfsError::invalid_path(format!(
            "{path}: unknown suffix, expected {GZ_SUFFIX}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fm(path: &str, lines: &[&str]) -> FileMatches {
        FileMatches {
            path: path.into(),
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_invalid_regex_is_literal() {
        let re = build_matcher("a(b", false).unwrap();
        assert_eq!(matching_lines(&re, b"xa(by\nab\n"), vec!["xa(by"]);
    }

    #[test]
    fn test_ignore_case() {
        let re = build_matcher("error", true).unwrap();
        assert_eq!(matching_lines(&re, b"ERROR one\nok\nError two"), vec!["ERROR one", "Error two"]);
    }

    #[test]
    fn test_shapes() {
        let per_file = vec![fm("/a", &["x", "x"]), fm("/b", &[]), fm("/c", &["x"])];

        let count = GrepOptions {
            count_only: true,
            ..Default::default()
        };
        assert_eq!(shape_grep(&count, "x", per_file.clone()).unwrap(), GrepResult::Count(3));

        let files = GrepOptions {
            files_only: true,
            ..Default::default()
        };
        assert_eq!(
            shape_grep(&files, "x", per_file.clone()).unwrap(),
            GrepResult::Files(vec!["/a".into(), "/c".into()])
        );

        let raw = shape_grep(&GrepOptions::default(), "x", per_file).unwrap();
        assert!(matches!(raw, GrepResult::Matches(m) if m.len() == 3));
    }

    #[test]
    fn test_all_empty_is_no_matches() {
        let err = shape_grep(&GrepOptions::default(), "zzz", vec![fm("/a", &[])]).unwrap_err();
        assert!(err.is_no_matches());
    }

    #[test]
    fn test_gzip_cycle() {
        let packed = gzip_bytes(b"hello hello hello").unwrap();
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip_bytes(&packed).unwrap(), b"hello hello hello");
    }

    #[test]
    fn test_strip_gz() {
        assert_eq!(strip_gz("b/k.txt.gz").unwrap(), "b/k.txt");
        assert!(strip_gz("b/k.txt").is_err());
        assert!(strip_gz(".gz").is_err());
    }
}
