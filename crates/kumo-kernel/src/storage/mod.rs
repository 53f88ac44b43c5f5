//! Object-storage client capability.
//!
//! The VFS treats the storage client as opaque: list buckets, list objects,
//! get/put/copy/remove objects, make/remove buckets. [`MemoryObjectStore`]
//! implements it in process; [`AwsObjectStore`] (feature `s3`) talks to any
//! S3-compatible endpoint.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::vfs::VfsError;

mod memory;
pub use memory::MemoryObjectStore;

#[cfg(feature = "s3")]
mod aws;
#[cfg(feature = "s3")]
pub use aws::AwsObjectStore;

/// Storage client error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No such bucket or key.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bucket already exists.
    #[error("bucket already exists: {0}")]
    BucketExists(String),

    /// Bucket still holds objects.
    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    /// Anything else the client reported, with its status code if known.
    #[error("{message}")]
    Upstream { message: String, code: Option<u16> },
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn upstream(message: impl Into<String>, code: Option<u16>) -> Self {
        Self::Upstream {
            message: message.into(),
            code,
        }
    }
}

impl From<StoreError> for VfsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => VfsError::NotFound(what),
            StoreError::BucketExists(b) => VfsError::AlreadyExists(b),
            StoreError::BucketNotEmpty(b) => VfsError::DirectoryNotEmpty(b),
            StoreError::Upstream { message, code } => VfsError::Upstream { message, code },
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A bucket as reported by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    /// Creation time, Unix milliseconds.
    pub created_ms: i64,
}

/// Object metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Last modification, Unix milliseconds.
    pub modified_ms: i64,
    pub content_type: Option<String>,
    pub public_read: bool,
}

/// One item of an object listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEntry {
    Object(ObjectInfo),
    /// Common prefix of a delimited listing, ending in `/`.
    Prefix(String),
}

/// Upload options.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub public_read: bool,
    pub content_type: Option<String>,
}

/// Opaque object-storage client.
///
/// Listings are lazy, pull-based streams: callers consume them to the end,
/// stop at the first item for existence checks, or surface a mid-stream
/// error as soon as it arrives.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>>;

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;

    async fn make_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Remove an empty bucket.
    async fn remove_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// List objects under `prefix`.
    ///
    /// Recursive listings yield only objects. Delimited listings (`/`) yield
    /// objects directly under the prefix plus one [`ObjectEntry::Prefix`] per
    /// deeper "directory".
    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        recursive: bool,
    ) -> BoxStream<'a, StoreResult<ObjectEntry>>;

    /// Object metadata, `None` when the key does not exist.
    async fn stat_object(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectInfo>>;

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Read `length` bytes at `offset`. Short reads at EOF.
    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: u64,
    ) -> StoreResult<Vec<u8>> {
        let data = self.get_object(bucket, key).await?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(length as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        opts: &PutOptions,
    ) -> StoreResult<()>;

    /// Server-side copy within this client.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()>;

    async fn remove_object(&self, bucket: &str, key: &str) -> StoreResult<()>;
}

/// Best-effort content type from a key's extension.
pub fn guess_content_type(key: &str) -> Option<&'static str> {
    let ext = key.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "txt" | "log" => "text/plain",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "gz" => "application/gzip",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_maps_to_vfs() {
        let e: VfsError = StoreError::not_found("b/k").into();
        assert!(e.is_not_found());
        let e: VfsError = StoreError::upstream("AccessDenied", Some(403)).into();
        assert_eq!(e.status_code(), Some(403));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(guess_content_type("a/b.JPG"), Some("image/jpeg"));
        assert_eq!(guess_content_type("noext"), None);
        assert_eq!(guess_content_type("x.bin"), None);
    }
}
