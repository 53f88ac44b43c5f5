//! In-memory object store.
//!
//! Used for `memory://` providers and testing. All data is ephemeral.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use kumo_types::now_millis;
use parking_lot::RwLock;

use super::{
    BucketInfo, ObjectEntry, ObjectInfo, ObjectStore, PutOptions, StoreError, StoreResult,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    info: ObjectInfo,
}

#[derive(Debug, Default)]
struct Bucket {
    created_ms: i64,
    objects: BTreeMap<String, StoredObject>,
}

/// In-memory object store.
///
/// Thread-safe via internal `RwLock`. Keys are kept sorted, so listings come
/// back in lexical order like a real S3 endpoint.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<BTreeMap<String, Bucket>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, creating its bucket if needed.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let mut buckets = self.buckets.write();
        let b = buckets.entry(bucket.to_string()).or_insert_with(|| Bucket {
            created_ms: now_millis(),
            objects: BTreeMap::new(),
        });
        b.objects.insert(
            key.to_string(),
            StoredObject {
                info: ObjectInfo {
                    key: key.to_string(),
                    size: data.len() as u64,
                    modified_ms: now_millis(),
                    content_type: super::guess_content_type(key).map(str::to_string),
                    public_read: false,
                },
                data,
            },
        );
    }

    /// Number of objects in a bucket, `None` if the bucket does not exist.
    pub fn object_count(&self, bucket: &str) -> Option<usize> {
        self.buckets.read().get(bucket).map(|b| b.objects.len())
    }

    fn snapshot(&self, bucket: &str, prefix: &str, recursive: bool) -> StoreResult<Vec<ObjectEntry>> {
        let buckets = self.buckets.read();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::not_found(bucket))?;

        let mut entries = Vec::new();
        let mut prefixes = BTreeSet::new();
        for (key, obj) in b.objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            if !recursive && let Some(idx) = rest.find('/') {
                let common = format!("{prefix}{}", &rest[..=idx]);
                if prefixes.insert(common.clone()) {
                    entries.push(ObjectEntry::Prefix(common));
                }
                continue;
            }
            entries.push(ObjectEntry::Object(obj.info.clone()));
        }
        Ok(entries)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        Ok(self
            .buckets
            .read()
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                created_ms: b.created_ms,
            })
            .collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        if buckets.contains_key(bucket) {
            return Err(StoreError::BucketExists(bucket.to_string()));
        }
        buckets.insert(
            bucket.to_string(),
            Bucket {
                created_ms: now_millis(),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        match buckets.get(bucket) {
            None => Err(StoreError::not_found(bucket)),
            Some(b) if !b.objects.is_empty() => Err(StoreError::BucketNotEmpty(bucket.to_string())),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        recursive: bool,
    ) -> BoxStream<'a, StoreResult<ObjectEntry>> {
        match self.snapshot(bucket, prefix, recursive) {
            Ok(entries) => Box::pin(stream::iter(entries.into_iter().map(Ok))),
            Err(e) => Box::pin(stream::once(async move { Err(e) })),
        }
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectInfo>> {
        let buckets = self.buckets.read();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::not_found(bucket))?;
        Ok(b.objects.get(key).map(|o| o.info.clone()))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let buckets = self.buckets.read();
        buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::not_found(format!("{bucket}/{key}")))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        opts: &PutOptions,
    ) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::not_found(bucket))?;
        let content_type = opts
            .content_type
            .clone()
            .or_else(|| super::guess_content_type(key).map(str::to_string));
        b.objects.insert(
            key.to_string(),
            StoredObject {
                info: ObjectInfo {
                    key: key.to_string(),
                    size: data.len() as u64,
                    modified_ms: now_millis(),
                    content_type,
                    public_read: opts.public_read,
                },
                data,
            },
        );
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        let mut obj = buckets
            .get(src_bucket)
            .and_then(|b| b.objects.get(src_key))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("{src_bucket}/{src_key}")))?;
        let dst = buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| StoreError::not_found(dst_bucket))?;
        obj.info.key = dst_key.to_string();
        obj.info.modified_ms = now_millis();
        dst.objects.insert(dst_key.to_string(), obj);
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::not_found(bucket))?;
        b.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("{bucket}/{key}")))
    }
}
