//! Virtual filesystem layer.
//!
//! Provides a uniform namespace over local disk and object storage, with
//! path-prefix routing to mounted backends.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 Vfs (router)                     │
//! │   groups paths per backend, negotiates copies    │
//! │                                                  │
//! │  /          → root synthesis                     │
//! │  /local     → LocalBackend                       │
//! │  /s3/minio  → StorageResponder  (native)         │
//! │  /s3/aws    → StorageForwarder  (sandboxed)      │
//! └──────────────────────────────────────────────────┘
//!                       │
//!            ┌──────────┴──────────┐
//!            ▼                     ▼
//!      ObjectStore           RemoteExec ──► proxy dispatcher
//! ```

pub mod backends;
mod error;
mod mount;
mod ops;
mod router;
mod types;

pub use error::{ErrorKind, VfsError, VfsResult};
pub use mount::{BackendFactory, MountTable, MountTableBuilder};
pub use ops::VfsOps;
pub use router::Vfs;
pub use types::{
    CompressOptions, CopyOptions, CopyPlan, CopySource, DEFAULT_PARALLEL_CPU,
    DEFAULT_PARALLEL_MEMORY, DEFAULT_PARALLEL_TASKS, GrepOptions, LsOptions, ParallelOptions,
};

pub use backends::local::LocalBackend;
pub use backends::s3::{StorageForwarder, StorageMount, StorageResponder};

/// Final component of a slash-separated path.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// True when copying files named `names` needs a directory to land in:
/// several files, or one that keeps a directory path from a recursive walk.
pub fn fills_directory<'a>(names: impl IntoIterator<Item = &'a str>) -> bool {
    let mut names = names.into_iter();
    match (names.next(), names.next()) {
        (Some(name), None) => name.contains('/'),
        (Some(_), Some(_)) => true,
        (None, _) => false,
    }
}

/// Join a directory and a name with exactly one slash.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        dir.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
