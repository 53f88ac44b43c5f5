//! Backend identity.
//!
//! Each mounted backend carries a static identity: where it is mounted,
//! whether it touches the local machine, whether it is virtual, and which
//! family it belongs to. The family is a closed enum so callers branch on
//! an explicit discriminant instead of probing capability labels.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Backend family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum BackendKind {
    /// Native disk, rooted at a directory.
    #[strum(serialize = "local", serialize = "disk")]
    Local,
    /// S3-compatible object storage, direct or forwarded.
    #[strum(serialize = "object_storage", serialize = "s3")]
    ObjectStorage,
}

impl BackendKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::ObjectStorage => "object_storage",
        }
    }

    /// True for object-storage backends.
    pub fn is_object_storage(&self) -> bool {
        matches!(self, BackendKind::ObjectStorage)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static identity of a mounted backend. Immutable after construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountIdentity {
    /// Absolute namespace prefix, no trailing slash (e.g. `/s3/minio`).
    pub mount_path: String,
    /// True when operations run against the local machine.
    pub is_local: bool,
    /// True when the namespace is synthesized (no real directory tree).
    pub is_virtual: bool,
    /// Backend family.
    pub kind: BackendKind,
}

impl MountIdentity {
    /// Identity of a local disk mount.
    pub fn local(mount_path: impl Into<String>) -> Self {
        Self {
            mount_path: normalize_mount_path(&mount_path.into()),
            is_local: true,
            is_virtual: false,
            kind: BackendKind::Local,
        }
    }

    /// Identity of an object-storage mount. Bucket/key trees are virtual.
    pub fn object_storage(mount_path: impl Into<String>) -> Self {
        Self {
            mount_path: normalize_mount_path(&mount_path.into()),
            is_local: false,
            is_virtual: true,
            kind: BackendKind::ObjectStorage,
        }
    }

    /// Strip this mount's prefix from a full namespace path.
    ///
    /// Returns the remainder without leading slashes, or `None` when the
    /// path is not under this mount.
    pub fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.mount_path == "/" {
            return Some(path.trim_start_matches('/'));
        }
        let rest = path.strip_prefix(self.mount_path.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest.trim_start_matches('/'))
        } else {
            None
        }
    }

    /// Join a relative path onto this mount's prefix.
    pub fn absolute(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            self.mount_path.clone()
        } else if self.mount_path == "/" {
            format!("/{relative}")
        } else {
            format!("{}/{}", self.mount_path, relative)
        }
    }
}

/// Normalize a mount path: leading `/`, no trailing slash, `/` for empty.
pub fn normalize_mount_path(path: &str) -> String {
    let s = path.trim_end_matches('/');
    if s.is_empty() {
        "/".to_string()
    } else if !s.starts_with('/') {
        format!("/{s}")
    } else {
        s.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        assert_eq!(BackendKind::from_str("s3"), Some(BackendKind::ObjectStorage));
        assert_eq!(BackendKind::from_str("DISK"), Some(BackendKind::Local));
        assert_eq!(BackendKind::from_str("ftp"), None);
        assert_eq!(BackendKind::ObjectStorage.to_string(), "object_storage");
    }

    #[test]
    fn test_relative_strips_prefix() {
        let id = MountIdentity::object_storage("/s3/minio/");
        assert_eq!(id.mount_path, "/s3/minio");
        assert_eq!(id.relative("/s3/minio"), Some(""));
        assert_eq!(id.relative("/s3/minio/bkt/a.txt"), Some("bkt/a.txt"));
        assert_eq!(id.relative("/s3/minion/bkt"), None);
        assert_eq!(id.relative("/tmp"), None);
    }

    #[test]
    fn test_relative_root_mount() {
        let id = MountIdentity::local("/");
        assert_eq!(id.relative("/home/x"), Some("home/x"));
        assert_eq!(id.absolute("home/x"), "/home/x");
        assert_eq!(id.absolute(""), "/");
    }

    #[test]
    fn test_absolute_joins() {
        let id = MountIdentity::object_storage("s3/aws");
        assert_eq!(id.mount_path, "/s3/aws");
        assert_eq!(id.absolute("bkt/k"), "/s3/aws/bkt/k");
        assert_eq!(id.absolute("/bkt"), "/s3/aws/bkt");
    }
}
