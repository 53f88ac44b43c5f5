//! Shared value types for the kumo virtual filesystem.
//!
//! Everything here is a plain, immutable value: produced by a backend,
//! handed to the caller, and freely cloned. Every type is serde-serializable
//! because results cross the remote execution boundary as JSON when a
//! sandboxed caller talks to a proxy. This crate has **no internal kumo
//! dependencies**.
//!
//! # Key Types
//!
//! |--------------------|---------------------------------------------------|
//! | Type               | Purpose                                           |
//! |--------------------|---------------------------------------------------|
//! | [`DirEntry`]       | One `ls` result (file-like or directory-like)     |
//! | [`FStat`]          | `fstat` result, optionally carrying content       |
//! | [`FetchedFile`]    | Fetch result: text, binary, JSON or error marker  |
//! | [`GrepResult`]     | Count, file list, or per-file matches             |
//! | [`CopyOutcome`]    | Destination paths written by `cp`                 |
//! | [`CompressResult`] | Outputs of `gzip`/`gunzip`                        |
//! | [`BackendKind`]    | Closed discriminant over backend families         |
//! | [`MountIdentity`]  | Static identity of a mounted backend              |
//! |--------------------|---------------------------------------------------|

pub mod backend;
pub mod dir_entry;
pub mod fetched;
pub mod fstat;
pub mod results;

pub mod b64;

pub use backend::{BackendKind, MountIdentity};
pub use dir_entry::{DirEntry, Dirent, Stats};
pub use fetched::FetchedFile;
pub use fstat::FStat;
pub use results::{CompressResult, CopyOutcome, FileMatches, GrepResult};

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
