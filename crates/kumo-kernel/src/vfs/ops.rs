//! VFS backend contract.
//!
//! Every backend receives full namespace paths (e.g. `/s3/minio/photos/a.jpg`)
//! and strips its own mount path. Multi-path operations receive only the paths
//! the router resolved to this backend.

use async_trait::async_trait;
use kumo_types::{CompressResult, CopyOutcome, DirEntry, FStat, GrepResult, MountIdentity};

use super::VfsResult;
use super::types::{CompressOptions, CopyOptions, CopyPlan, GrepOptions, LsOptions};

/// Core VFS operations trait.
///
/// Implemented directly by backends that can reach their storage
/// (local disk, object-storage responder) and by forwarders that re-issue
/// each call across the remote execution channel.
#[async_trait]
pub trait VfsOps: Send + Sync {
    /// Static identity: mount path, locality, virtuality and kind.
    fn identity(&self) -> &MountIdentity;

    // ========================================================================
    // Reading
    // ========================================================================

    /// List entries for each path. Globs are allowed where the backend
    /// supports them.
    async fn ls(&self, opts: &LsOptions, paths: &[String]) -> VfsResult<Vec<DirEntry>>;

    /// Stat a path, optionally reading its content.
    ///
    /// With `enoent_ok`, a missing path yields `Ok(None)` instead of NotFound.
    async fn fstat(&self, path: &str, with_data: bool, enoent_ok: bool)
    -> VfsResult<Option<FStat>>;

    /// Read up to `length` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if EOF is reached.
    async fn fslice(&self, path: &str, offset: u64, length: u64) -> VfsResult<Vec<u8>>;

    /// Search file contents.
    async fn grep(
        &self,
        opts: &GrepOptions,
        pattern: &str,
        paths: &[String],
    ) -> VfsResult<GrepResult>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Replace the whole content of a file or object.
    async fn fwrite(&self, path: &str, data: &[u8]) -> VfsResult<()>;

    /// Copy sources into the destination described by `plan`.
    async fn cp(&self, opts: &CopyOptions, plan: &CopyPlan) -> VfsResult<CopyOutcome>;

    /// Remove a path. Returns true when something was removed.
    async fn rm(&self, path: &str, recursive: bool) -> VfsResult<bool>;

    async fn mkdir(&self, path: &str) -> VfsResult<()>;

    async fn rmdir(&self, path: &str) -> VfsResult<()>;

    async fn gzip(&self, opts: &CompressOptions, paths: &[String]) -> VfsResult<CompressResult>;

    async fn gunzip(&self, opts: &CompressOptions, paths: &[String])
    -> VfsResult<CompressResult>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> bool {
        matches!(self.fstat(path, false, true).await, Ok(Some(_)))
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        match self.fstat(path, true, false).await? {
            Some(FStat {
                data: Some(data), ..
            }) => Ok(data),
            Some(stat) if stat.is_directory => Err(super::VfsError::is_a_directory(path)),
            _ => Err(super::VfsError::not_found(path)),
        }
    }
}
