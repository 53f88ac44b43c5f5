//! Splitting mount-relative paths into bucket, prefix and wildcard suffix.

use std::sync::LazyLock;

use regex::Regex;

use crate::glob::{contains_glob, literal_prefix};

/// `<bucket>[/]<literal prefix><wildcard suffix>`.
static OBJECT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^/*{]+)(/?)([^*{]*)(.*)$").expect("object path regex is valid")
});

/// A mount-relative object path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub bucket: String,
    /// True when anything followed the bucket, even a bare `/`.
    pub has_slash: bool,
    /// Literal key text before the first `*` or `{`.
    pub prefix: String,
    /// Rest of the key, starting at the first `*` or `{`.
    pub suffix: String,
}

impl ObjectPath {
    /// Split `relative` (no leading slash). `None` when it does not start
    /// with a literal bucket name.
    pub fn parse(relative: &str) -> Option<Self> {
        let caps = OBJECT_PATH.captures(relative.trim_start_matches('/'))?;
        let group = |i| caps.get(i).map_or("", |m| m.as_str()).to_string();
        Some(Self {
            bucket: group(1),
            has_slash: !group(2).is_empty(),
            prefix: group(3),
            suffix: group(4),
        })
    }

    /// Whole key, possibly containing glob characters.
    pub fn key(&self) -> String {
        format!("{}{}", self.prefix, self.suffix)
    }

    /// True when only a bucket was named.
    pub fn is_bucket(&self) -> bool {
        self.prefix.is_empty() && self.suffix.is_empty()
    }

    /// The first path segment when it holds a wildcard: `pho*` in both
    /// `pho*` and `pho*/x.jpg`, `ph?tos` in `ph?tos/`.
    pub fn bucket_pattern(&self) -> Option<String> {
        let segment = if self.has_slash {
            self.bucket.clone()
        } else {
            let whole = format!("{}{}", self.bucket, self.suffix);
            whole.split('/').next().unwrap_or_default().to_string()
        };
        contains_glob(&segment).then_some(segment)
    }

    pub fn has_wildcard(&self) -> bool {
        contains_glob(&self.key()) || contains_glob(&self.bucket)
    }

    /// Server-side listing prefix for a wildcard key.
    pub fn list_prefix(&self) -> String {
        literal_prefix(&self.key()).to_string()
    }
}
