//! Directory listing entries.

use serde::{Deserialize, Serialize};

/// Size, timestamps and ownership of a listed entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time, Unix millis.
    pub mtime_ms: i64,
    /// Unix mode bits, including the file type bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Type and permission flags of a listed entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dirent {
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symbolic_link: bool,
    /// Sockets, fifos, devices.
    pub is_special: bool,
    pub is_executable: bool,
    /// `ls -l` style permission string, e.g. `-rw-r--r--`.
    pub permissions: String,
    pub owner: String,
}

/// One listing result.
///
/// A point-in-time snapshot produced by `ls`; never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    /// Final path component.
    pub name: String,
    /// Full namespace path (e.g. `/s3/minio/bucket/photos/a.jpg`).
    pub path: String,
    pub stats: Stats,
    /// Name to show the user; may differ from `name` (e.g. full object key).
    pub display_name: String,
    pub dirent: Dirent,
}

const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

impl DirEntry {
    /// A regular file entry with default `0644` permissions.
    pub fn file(name: impl Into<String>, path: impl Into<String>, size: u64, mtime_ms: i64) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            path: path.into(),
            stats: Stats {
                size,
                mtime_ms,
                mode: S_IFREG | 0o644,
                uid: 0,
                gid: 0,
            },
            dirent: Dirent {
                is_file: true,
                permissions: permission_string(S_IFREG | 0o644),
                ..Default::default()
            },
        }
    }

    /// A directory entry with default `0755` permissions.
    pub fn directory(name: impl Into<String>, path: impl Into<String>, mtime_ms: i64) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            path: path.into(),
            stats: Stats {
                size: 0,
                mtime_ms,
                mode: S_IFDIR | 0o755,
                uid: 0,
                gid: 0,
            },
            dirent: Dirent {
                is_directory: true,
                permissions: permission_string(S_IFDIR | 0o755),
                ..Default::default()
            },
        }
    }

    /// Override the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Set the owner shown in long listings.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.dirent.owner = owner.into();
        self
    }

    pub fn is_dir(&self) -> bool {
        self.dirent.is_directory
    }
}

/// Render mode bits the way `ls -l` does.
pub fn permission_string(mode: u32) -> String {
    let kind = match mode & 0o170000 {
        S_IFDIR => 'd',
        0o120000 => 'l',
        0o140000 => 's',
        0o010000 => 'p',
        0o020000 | 0o060000 => 'c',
        _ => '-',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_entry() {
        let e = DirEntry::file("a.jpg", "/s3/m/b/photos/a.jpg", 42, 1000);
        assert!(e.dirent.is_file);
        assert!(!e.is_dir());
        assert_eq!(e.stats.size, 42);
        assert_eq!(e.dirent.permissions, "-rw-r--r--");
        assert_eq!(e.display_name, "a.jpg");
    }

    #[test]
    fn test_directory_entry() {
        let e = DirEntry::directory("photos", "/s3/m/b/photos", 0).with_display_name("photos/");
        assert!(e.is_dir());
        assert_eq!(e.dirent.permissions, "drwxr-xr-x");
        assert_eq!(e.display_name, "photos/");
    }

    #[test]
    fn test_permission_string() {
        assert_eq!(permission_string(0o100755), "-rwxr-xr-x");
        assert_eq!(permission_string(0o120777), "lrwxrwxrwx");
    }

    #[test]
    fn test_json_uses_camel_case() {
        let e = DirEntry::file("x", "/x", 1, 2);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["displayName"], "x");
        assert_eq!(json["stats"]["mtimeMs"], 2);
        assert_eq!(json["dirent"]["isFile"], true);
    }
}
