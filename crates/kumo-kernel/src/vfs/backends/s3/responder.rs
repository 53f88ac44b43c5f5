//! Object-storage backend over a direct [`ObjectStore`] client.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use futures::{StreamExt, TryStreamExt};
use kumo_types::{CompressResult, CopyOutcome, DirEntry, FStat, FileMatches, GrepResult, MountIdentity};
use tracing::{debug, warn};

use super::StorageMount;
use super::parallel::Offload;
use super::path::ObjectPath;
use super::validate_bucket_name;
use crate::glob::{contains_glob, glob_match};
use crate::jobs::{JobProvider, WorkerRecord, WorkerSpec};
use crate::storage::{ObjectEntry, ObjectInfo, ObjectStore, PutOptions, guess_content_type};
use crate::vfs::backends::content::{
    GZ_SUFFIX, build_matcher, gunzip_bytes, gzip_bytes, matching_lines, shape_grep, strip_gz,
};
use crate::vfs::{
    CompressOptions, CopyOptions, CopyPlan, CopySource, GrepOptions, LsOptions, ParallelOptions,
    VfsError, VfsOps, VfsResult, basename, fills_directory, join_path,
};

/// Worker image used when the caller does not name one.
pub const DEFAULT_WORKER_IMAGE: &str = "ghcr.io/kumo-vfs/kumo-worker:latest";

/// One object, addressed within this store.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ObjectRef {
    bucket: String,
    key: String,
}

impl ObjectRef {
    fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `bucket/key`, the worker input format.
    fn input(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }
}

/// Where a copied file comes from.
enum Origin {
    /// An object in this store.
    Native(ObjectRef),
    /// A file in some other backend.
    Foreign {
        backend: Arc<dyn VfsOps>,
        path: String,
    },
}

/// One file to copy, with its name relative to a destination directory.
struct Transfer {
    origin: Origin,
    name: String,
}

/// Native object-storage backend.
pub struct StorageResponder {
    mount: StorageMount,
    store: Arc<dyn ObjectStore>,
    jobs: Option<Arc<dyn JobProvider>>,
    worker_image: String,
}

impl std::fmt::Debug for StorageResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageResponder")
            .field("mount", &self.mount.mount_path())
            .field("jobs", &self.jobs.is_some())
            .field("worker_image", &self.worker_image)
            .finish()
    }
}

impl StorageResponder {
    pub fn new(mount: StorageMount, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            mount,
            store,
            jobs: None,
            worker_image: DEFAULT_WORKER_IMAGE.to_string(),
        }
    }

    /// Enable `parallel` offload for grep/gzip/gunzip.
    pub fn with_jobs(mut self, jobs: Arc<dyn JobProvider>, image: Option<String>) -> Self {
        self.jobs = Some(jobs);
        if let Some(image) = image {
            self.worker_image = image;
        }
        self
    }

    pub fn mount(&self) -> &StorageMount {
        &self.mount
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    // ========================================================================
    // Paths
    // ========================================================================

    fn relative<'a>(&self, path: &'a str) -> VfsResult<&'a str> {
        self.mount.identity().relative(path).ok_or_else(|| {
            VfsError::invalid_path(format!("{path} is not under {}", self.mount.mount_path()))
        })
    }

    /// Split a full path. `None` for the mount root.
    fn split(&self, path: &str) -> VfsResult<Option<ObjectPath>> {
        let rel = self.relative(path)?;
        if rel.is_empty() {
            return Ok(None);
        }
        ObjectPath::parse(rel)
            .map(Some)
            .ok_or_else(|| VfsError::invalid_path(path.to_string()))
    }

    /// A single concrete object path.
    fn object(&self, path: &str) -> VfsResult<ObjectRef> {
        match self.split(path)? {
            Some(p) if !p.is_bucket() && !p.has_wildcard() && !p.key().ends_with('/') => {
                let key = p.key();
                Ok(ObjectRef::new(p.bucket, key))
            }
            Some(p) if p.is_bucket() => Err(VfsError::is_a_directory(path)),
            _ => Err(VfsError::invalid_path(format!("{path}: expected an object path"))),
        }
    }

    fn absolute(&self, bucket: &str, key: &str) -> String {
        self.mount.identity().absolute(&join_path(bucket, key))
    }

    fn object_entry(&self, bucket: &str, info: &ObjectInfo) -> DirEntry {
        DirEntry::file(
            basename(&info.key),
            self.absolute(bucket, &info.key),
            info.size,
            info.modified_ms,
        )
        .with_display_name(info.key.clone())
    }

    fn prefix_entry(&self, bucket: &str, prefix: &str) -> DirEntry {
        let trimmed = prefix.trim_end_matches('/');
        DirEntry::directory(basename(trimmed), self.absolute(bucket, trimmed), 0)
    }

    fn listing_entry(&self, bucket: &str, entry: &ObjectEntry) -> DirEntry {
        match entry {
            ObjectEntry::Object(info) => self.object_entry(bucket, info),
            ObjectEntry::Prefix(prefix) => self.prefix_entry(bucket, prefix),
        }
    }

    // ========================================================================
    // Enumeration
    // ========================================================================

    async fn list(&self, bucket: &str, prefix: &str, recursive: bool) -> VfsResult<Vec<ObjectEntry>> {
        Ok(self
            .store
            .list_objects(bucket, prefix, recursive)
            .try_collect()
            .await?)
    }

    /// Objects (not prefixes) under `prefix`, recursively.
    async fn objects_under(&self, bucket: &str, prefix: &str) -> VfsResult<Vec<ObjectInfo>> {
        Ok(self
            .list(bucket, prefix, true)
            .await?
            .into_iter()
            .filter_map(|e| match e {
                ObjectEntry::Object(info) => Some(info),
                ObjectEntry::Prefix(_) => None,
            })
            .collect())
    }

    /// True when anything lives under `prefix`. Stops at the first item.
    async fn prefix_exists(&self, bucket: &str, prefix: &str) -> VfsResult<bool> {
        let mut stream = self.store.list_objects(bucket, prefix, true);
        match stream.next().await {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e.into()),
            None => Ok(false),
        }
    }

    /// Objects matching a wildcard path. Wildcards are only honored below
    /// an exact bucket name.
    async fn glob_objects(&self, p: &ObjectPath) -> VfsResult<Vec<ObjectInfo>> {
        if let Some(bucket) = p.bucket_pattern() {
            return Err(VfsError::invalid_path(format!(
                "{bucket}: wildcards in a bucket name only match buckets"
            )));
        }
        let pattern = p.key();
        Ok(self
            .objects_under(&p.bucket, &p.list_prefix())
            .await?
            .into_iter()
            .filter(|info| glob_match(&pattern, &info.key))
            .collect())
    }

    async fn buckets_matching(&self, pattern: &str) -> VfsResult<Vec<DirEntry>> {
        let pattern = pattern.trim_end_matches('/');
        Ok(self
            .store
            .list_buckets()
            .await?
            .into_iter()
            .filter(|b| glob_match(pattern, &b.name))
            .map(|b| DirEntry::directory(b.name.clone(), self.absolute(&b.name, ""), b.created_ms))
            .collect())
    }

    /// Concrete objects named by `paths` (exact keys or wildcards).
    async fn resolve_objects(&self, paths: &[String]) -> VfsResult<Vec<ObjectRef>> {
        let mut out = Vec::new();
        for path in paths {
            let p = self
                .split(path)?
                .ok_or_else(|| VfsError::is_a_directory(path.clone()))?;
            if p.is_bucket() {
                return Err(VfsError::is_a_directory(path.clone()));
            }
            if p.has_wildcard() {
                let found = self.glob_objects(&p).await?;
                if found.is_empty() {
                    return Err(VfsError::not_found(path.clone()));
                }
                out.extend(found.into_iter().map(|i| ObjectRef::new(&p.bucket, i.key)));
            } else {
                let key = p.key();
                if self.store.stat_object(&p.bucket, &key).await?.is_none() {
                    return Err(if self.prefix_exists(&p.bucket, &dir_prefix(&key)).await? {
                        VfsError::is_a_directory(path.clone())
                    } else {
                        VfsError::not_found(path.clone())
                    });
                }
                out.push(ObjectRef::new(p.bucket, key));
            }
        }
        Ok(out)
    }

    async fn ls_one(&self, opts: &LsOptions, path: &str) -> VfsResult<Vec<DirEntry>> {
        let rel = self.relative(path)?;
        if rel.is_empty() {
            if opts.directory {
                return Ok(vec![DirEntry::directory(
                    self.mount.name(),
                    self.mount.mount_path(),
                    0,
                )]);
            }
            return self.buckets_matching("*").await;
        }
        let Some(p) = ObjectPath::parse(rel) else {
            // Leading wildcard: a bucket pattern.
            return self.buckets_matching(rel).await;
        };
        if let Some(pattern) = p.bucket_pattern()
            && !rel.trim_end_matches('/').contains('/')
        {
            return self.buckets_matching(&pattern).await;
        }

        if p.is_bucket() {
            if opts.directory {
                return if self.store.bucket_exists(&p.bucket).await? {
                    Ok(vec![DirEntry::directory(
                        p.bucket.clone(),
                        self.absolute(&p.bucket, ""),
                        0,
                    )])
                } else {
                    Err(VfsError::not_found(path))
                };
            }
            let entries = self.list(&p.bucket, "", false).await?;
            return Ok(entries.iter().map(|e| self.listing_entry(&p.bucket, e)).collect());
        }

        if p.has_wildcard() {
            let found = self.glob_objects(&p).await?;
            if found.is_empty() {
                return Err(VfsError::not_found(path));
            }
            return Ok(found.iter().map(|i| self.object_entry(&p.bucket, i)).collect());
        }

        let key = p.key();
        if !key.ends_with('/')
            && let Some(info) = self.store.stat_object(&p.bucket, &key).await?
        {
            return Ok(vec![self.object_entry(&p.bucket, &info)]);
        }
        let prefix = dir_prefix(&key);
        if opts.directory {
            return if self.prefix_exists(&p.bucket, &prefix).await? {
                Ok(vec![self.prefix_entry(&p.bucket, &prefix)])
            } else {
                Err(VfsError::not_found(path))
            };
        }
        let entries = self.list(&p.bucket, &prefix, false).await?;
        if entries.is_empty() {
            return Err(VfsError::not_found(path));
        }
        Ok(entries
            .iter()
            // A directory marker lists as its own prefix; hide it.
            .filter(|e| !matches!(e, ObjectEntry::Object(i) if i.key == prefix))
            .map(|e| self.listing_entry(&p.bucket, e))
            .collect())
    }

    async fn fstat_inner(&self, path: &str, with_data: bool) -> VfsResult<FStat> {
        let Some(p) = self.split(path)? else {
            return Ok(FStat::directory(path));
        };
        if p.has_wildcard() {
            return Err(VfsError::invalid_path(format!("{path}: wildcards are not allowed here")));
        }
        if p.is_bucket() {
            return if self.store.bucket_exists(&p.bucket).await? {
                Ok(FStat::directory(path))
            } else {
                Err(VfsError::not_found(path))
            };
        }
        let key = p.key();
        let key = key.trim_end_matches('/');
        if let Some(info) = self.store.stat_object(&p.bucket, key).await? {
            let stat = FStat::file(path, info.size);
            return if with_data {
                Ok(stat.with_data(self.store.get_object(&p.bucket, key).await?))
            } else {
                Ok(stat)
            };
        }
        if self.prefix_exists(&p.bucket, &dir_prefix(key)).await? {
            Ok(FStat::directory(path))
        } else {
            Err(VfsError::not_found(path))
        }
    }

    // ========================================================================
    // Copy
    // ========================================================================

    /// Expand one source into transfers.
    async fn expand_source(&self, opts: &CopyOptions, src: &CopySource) -> VfsResult<Vec<Transfer>> {
        if src.is_self {
            self.expand_native(opts, &src.path).await
        } else {
            expand_foreign(opts, &src.backend, &src.path).await
        }
    }

    async fn expand_native(&self, opts: &CopyOptions, path: &str) -> VfsResult<Vec<Transfer>> {
        let p = self
            .split(path)?
            .ok_or_else(|| VfsError::is_a_directory(path))?;
        let native = |bucket: &str, key: String, name: String| Transfer {
            origin: Origin::Native(ObjectRef::new(bucket, key)),
            name,
        };

        if p.is_bucket() {
            if !opts.recursive {
                return Err(VfsError::is_a_directory(path));
            }
            let objects = self.objects_under(&p.bucket, "").await?;
            return Ok(objects
                .into_iter()
                .map(|i| {
                    let name = join_path(&p.bucket, &i.key);
                    native(&p.bucket, i.key, name)
                })
                .collect());
        }
        if p.has_wildcard() {
            let found = self.glob_objects(&p).await?;
            if found.is_empty() {
                return Err(VfsError::not_found(path));
            }
            return Ok(found
                .into_iter()
                .map(|i| {
                    let name = basename(&i.key).to_string();
                    native(&p.bucket, i.key, name)
                })
                .collect());
        }

        let key = p.key();
        if !key.ends_with('/') && self.store.stat_object(&p.bucket, &key).await?.is_some() {
            let name = basename(&key).to_string();
            return Ok(vec![native(&p.bucket, key, name)]);
        }
        let prefix = dir_prefix(&key);
        let objects = self.objects_under(&p.bucket, &prefix).await?;
        if objects.is_empty() {
            return Err(VfsError::not_found(path));
        }
        if !opts.recursive {
            return Err(VfsError::is_a_directory(path));
        }
        let dir_name = basename(&prefix).to_string();
        Ok(objects
            .into_iter()
            .filter(|i| i.key != prefix)
            .map(|i| {
                let name = join_path(&dir_name, &i.key[prefix.len()..]);
                native(&p.bucket, i.key, name)
            })
            .collect())
    }

    async fn read(&self, origin: &Origin) -> VfsResult<Vec<u8>> {
        match origin {
            Origin::Native(obj) => Ok(self.store.get_object(&obj.bucket, &obj.key).await?),
            Origin::Foreign { backend, path } => backend.read_all(path).await,
        }
    }

    /// Copy into this store.
    async fn copy_in(
        &self,
        opts: &CopyOptions,
        dst: &str,
        transfers: Vec<Transfer>,
    ) -> VfsResult<CopyOutcome> {
        let p = self.split(dst)?.ok_or_else(|| {
            VfsError::invalid_path(format!("{dst}: copy into a bucket, not the mount root"))
        })?;
        if p.has_wildcard() {
            return Err(VfsError::invalid_path(format!("{dst}: wildcard destination")));
        }
        let key = p.key();
        let existing = if key.is_empty() || key.ends_with('/') {
            None
        } else {
            self.store.stat_object(&p.bucket, &key).await?
        };
        let fills = fills_directory(transfers.iter().map(|t| t.name.as_str()));
        if existing.is_some() && fills {
            return Err(VfsError::destination_not_directory(dst));
        }
        // Without an object name the destination is a directory.
        let into_dir = key.is_empty()
            || key.ends_with('/')
            || fills
            || (existing.is_none() && self.prefix_exists(&p.bucket, &dir_prefix(&key)).await?);

        let bucket = p.bucket.as_str();
        let copies = transfers.into_iter().map(|t| {
            let dst_key = if into_dir {
                join_path(&key, &t.name)
            } else {
                key.clone()
            };
            async move {
                match &t.origin {
                    Origin::Native(src) => {
                        debug!(src = %src.input(), dst = %format!("{bucket}/{dst_key}"), "server-side copy");
                        self.store
                            .copy_object(&src.bucket, &src.key, bucket, &dst_key)
                            .await?;
                    }
                    Origin::Foreign { .. } => {
                        let data = self.read(&t.origin).await?;
                        let put = PutOptions {
                            public_read: opts.public_read,
                            content_type: guess_content_type(&dst_key).map(str::to_string),
                        };
                        self.store.put_object(bucket, &dst_key, data, &put).await?;
                    }
                }
                Ok::<_, VfsError>(self.absolute(bucket, &dst_key))
            }
        });
        Ok(CopyOutcome {
            copied: try_join_all(copies).await?,
        })
    }

    /// Copy out of this store into another backend.
    async fn copy_out(&self, plan: &CopyPlan, transfers: Vec<Transfer>) -> VfsResult<CopyOutcome> {
        let stat = plan.dst_backend.fstat(&plan.dst, false, true).await?;
        let fills = fills_directory(transfers.iter().map(|t| t.name.as_str()));
        let into_dir = plan.dst.ends_with('/')
            || stat.as_ref().is_some_and(|s| s.is_directory)
            || (stat.is_none() && fills);
        if !into_dir && fills {
            return Err(VfsError::destination_not_directory(plan.dst.clone()));
        }
        let copies = transfers.into_iter().map(|t| {
            let target = if into_dir {
                join_path(&plan.dst, &t.name)
            } else {
                plan.dst.clone()
            };
            async move {
                let data = self.read(&t.origin).await?;
                debug!(%target, bytes = data.len(), "download");
                plan.dst_backend.fwrite(&target, &data).await?;
                Ok::<_, VfsError>(target)
            }
        });
        Ok(CopyOutcome {
            copied: try_join_all(copies).await?,
        })
    }

    // ========================================================================
    // Offload
    // ========================================================================

    fn offload(&self) -> VfsResult<Offload<'_>> {
        let jobs = self.jobs.as_deref().ok_or_else(|| {
            VfsError::unsupported(format!(
                "{}: no data-parallel job provider configured",
                self.mount.mount_path()
            ))
        })?;
        Ok(Offload {
            jobs,
            default_image: &self.worker_image,
            mount: self.mount.mount_path(),
        })
    }

    async fn compress(
        &self,
        par: Option<&ParallelOptions>,
        spec: WorkerSpec,
        objects: Vec<(ObjectRef, String)>,
    ) -> VfsResult<CompressResult> {
        if let Some(par) = par {
            let inputs: Vec<String> = objects.iter().map(|(o, _)| o.input()).collect();
            let out = self
                .offload()?
                .run(par, &spec, &inputs, par.with_logs)
                .await?;
            let outputs = if par.with_logs {
                let records = fail_on_worker_errors(&out.job_id, out.records)?;
                records
                    .into_iter()
                    .filter_map(|r| match r {
                        WorkerRecord::Output { path } => Some(path),
                        _ => None,
                    })
                    .collect()
            } else {
                objects
                    .iter()
                    .map(|(o, output)| self.absolute(&o.bucket, output))
                    .collect()
            };
            return Ok(CompressResult {
                outputs,
                job_id: Some(out.job_id),
            });
        }

        let jobs = objects.into_iter().map(|(obj, output)| {
            let spec = &spec;
            async move {
                let data = self.store.get_object(&obj.bucket, &obj.key).await?;
                let data = match spec {
                    WorkerSpec::Gunzip => gunzip_bytes(&data)?,
                    _ => gzip_bytes(&data)?,
                };
                self.store
                    .put_object(&obj.bucket, &output, data, &PutOptions::default())
                    .await?;
                self.store.remove_object(&obj.bucket, &obj.key).await?;
                Ok::<_, VfsError>(self.absolute(&obj.bucket, &output))
            }
        });
        Ok(CompressResult {
            outputs: try_join_all(jobs).await?,
            job_id: None,
        })
    }
}

/// Pass the records through, or fail naming every input a worker could not
/// process.
fn fail_on_worker_errors(job_id: &str, records: Vec<WorkerRecord>) -> VfsResult<Vec<WorkerRecord>> {
    let failures: Vec<String> = records
        .iter()
        .filter_map(|r| match r {
            WorkerRecord::Failed { path, message } => {
                warn!(job = %job_id, %path, %message, "worker failed");
                Some(format!("{path}: {message}"))
            }
            _ => None,
        })
        .collect();
    if failures.is_empty() {
        Ok(records)
    } else {
        Err(VfsError::upstream(
            format!("job {job_id}: {}", failures.join("; ")),
            None,
        ))
    }
}

/// `key` as a directory prefix: empty stays empty, otherwise ends in `/`.
fn dir_prefix(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Expand a source owned by another backend.
async fn expand_foreign(
    opts: &CopyOptions,
    backend: &Arc<dyn VfsOps>,
    path: &str,
) -> VfsResult<Vec<Transfer>> {
    let foreign = |path: String, name: String| Transfer {
        origin: Origin::Foreign {
            backend: Arc::clone(backend),
            path,
        },
        name,
    };

    if contains_glob(path) {
        let entries = backend.ls(&LsOptions::default(), &[path.to_string()]).await?;
        return Ok(entries
            .into_iter()
            .filter(|e| !e.is_dir())
            .map(|e| foreign(e.path, e.name))
            .collect());
    }

    let stat = backend
        .fstat(path, false, false)
        .await?
        .ok_or_else(|| VfsError::not_found(path))?;
    if !stat.is_directory {
        return Ok(vec![foreign(path.to_string(), basename(path).to_string())]);
    }
    if !opts.recursive {
        return Err(VfsError::is_a_directory(path));
    }

    // Walk the tree; names keep the directory's own name as their root.
    let mut out = Vec::new();
    let mut pending = vec![(path.to_string(), basename(path).to_string())];
    while let Some((dir, name)) = pending.pop() {
        for entry in backend.ls(&LsOptions::default(), &[dir]).await? {
            let child = join_path(&name, &entry.name);
            if entry.is_dir() {
                pending.push((entry.path, child));
            } else {
                out.push(foreign(entry.path, child));
            }
        }
    }
    Ok(out)
}

#[async_trait]
impl VfsOps for StorageResponder {
    fn identity(&self) -> &MountIdentity {
        self.mount.identity()
    }

    async fn ls(&self, opts: &LsOptions, paths: &[String]) -> VfsResult<Vec<DirEntry>> {
        let listed = try_join_all(paths.iter().map(|p| self.ls_one(opts, p))).await?;
        Ok(listed.into_iter().flatten().collect())
    }

    async fn fstat(&self, path: &str, with_data: bool, enoent_ok: bool) -> VfsResult<Option<FStat>> {
        match self.fstat_inner(path, with_data).await {
            Ok(stat) => Ok(Some(stat)),
            Err(e) if enoent_ok && e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fslice(&self, path: &str, offset: u64, length: u64) -> VfsResult<Vec<u8>> {
        let obj = self.object(path)?;
        Ok(self
            .store
            .get_object_range(&obj.bucket, &obj.key, offset, length)
            .await?)
    }

    async fn grep(&self, opts: &GrepOptions, pattern: &str, paths: &[String]) -> VfsResult<GrepResult> {
        let objects = self.resolve_objects(paths).await?;

        let per_file = if let Some(par) = &opts.parallel {
            let spec = WorkerSpec::Grep {
                pattern: pattern.to_string(),
                ignore_case: opts.ignore_case,
            };
            let inputs: Vec<String> = objects.iter().map(ObjectRef::input).collect();
            let out = self.offload()?.run(par, &spec, &inputs, true).await?;
            fail_on_worker_errors(&out.job_id, out.records)?
                .into_iter()
                .filter_map(|r| match r {
                    WorkerRecord::Matches { path, lines } => Some(FileMatches { path, lines }),
                    _ => None,
                })
                .collect()
        } else {
            let re = build_matcher(pattern, opts.ignore_case)?;
            let re = &re;
            try_join_all(objects.iter().map(|obj| async move {
                let data = self.store.get_object(&obj.bucket, &obj.key).await?;
                Ok::<_, VfsError>(FileMatches {
                    path: self.absolute(&obj.bucket, &obj.key),
                    lines: matching_lines(re, &data),
                })
            }))
            .await?
        };
        shape_grep(opts, pattern, per_file)
    }

    async fn fwrite(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let obj = self.object(path)?;
        let put = PutOptions {
            public_read: false,
            content_type: guess_content_type(&obj.key).map(str::to_string),
        };
        self.store
            .put_object(&obj.bucket, &obj.key, data.to_vec(), &put)
            .await?;
        Ok(())
    }

    async fn cp(&self, opts: &CopyOptions, plan: &CopyPlan) -> VfsResult<CopyOutcome> {
        let expanded = try_join_all(plan.sources.iter().map(|s| self.expand_source(opts, s))).await?;
        let transfers: Vec<Transfer> = expanded.into_iter().flatten().collect();
        debug!(
            dst = %plan.dst,
            transfers = transfers.len(),
            dst_is_self = plan.dst_is_self,
            "cp"
        );
        if plan.dst_is_self {
            self.copy_in(opts, &plan.dst, transfers).await
        } else {
            self.copy_out(plan, transfers).await
        }
    }

    async fn rm(&self, path: &str, recursive: bool) -> VfsResult<bool> {
        let p = self.split(path)?.ok_or_else(|| {
            VfsError::invalid_path(format!("{path}: refusing to remove the mount root"))
        })?;
        if p.bucket_pattern().is_some() {
            return Err(VfsError::invalid_path(format!(
                "{path}: bucket removal needs an exact name"
            )));
        }

        if p.is_bucket() {
            if !recursive {
                return Err(VfsError::BucketNeedsRecursive(p.bucket));
            }
            let objects = self.objects_under(&p.bucket, "").await?;
            try_join_all(objects.iter().map(|i| self.store.remove_object(&p.bucket, &i.key))).await?;
            self.store.remove_bucket(&p.bucket).await?;
            return Ok(true);
        }

        let doomed: Vec<String> = if p.has_wildcard() {
            self.glob_objects(&p).await?.into_iter().map(|i| i.key).collect()
        } else {
            let key = p.key();
            if !key.ends_with('/') && self.store.stat_object(&p.bucket, &key).await?.is_some() {
                vec![key]
            } else {
                let under = self.objects_under(&p.bucket, &dir_prefix(&key)).await?;
                if !under.is_empty() && !recursive {
                    return Err(VfsError::is_a_directory(path));
                }
                under.into_iter().map(|i| i.key).collect()
            }
        };
        if doomed.is_empty() {
            return Err(VfsError::not_found(path));
        }
        debug!(path, count = doomed.len(), "rm");
        try_join_all(doomed.iter().map(|k| self.store.remove_object(&p.bucket, k))).await?;
        Ok(true)
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        let p = self
            .split(path)?
            .ok_or_else(|| VfsError::already_exists(path))?;
        if p.bucket_pattern().is_some() {
            return Err(VfsError::invalid_path(format!(
                "{path}: bucket names cannot contain wildcards"
            )));
        }
        if !p.is_bucket() {
            return Err(VfsError::invalid_path(format!(
                "{path}: only buckets can be created here"
            )));
        }
        validate_bucket_name(&p.bucket).map_err(|violation| VfsError::InvalidBucketName {
            name: p.bucket.clone(),
            violation,
        })?;
        self.store.make_bucket(&p.bucket).await?;
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let p = self.split(path)?.ok_or_else(|| {
            VfsError::invalid_path(format!("{path}: refusing to remove the mount root"))
        })?;
        if p.has_wildcard() {
            return Err(VfsError::invalid_path(format!("{path}: wildcards are not allowed here")));
        }
        if p.is_bucket() {
            self.store.remove_bucket(&p.bucket).await?;
            return Ok(());
        }
        let prefix = dir_prefix(&p.key());
        let under = self.objects_under(&p.bucket, &prefix).await?;
        match under.as_slice() {
            [] => Err(VfsError::not_found(path)),
            [marker] if marker.key == prefix => {
                self.store.remove_object(&p.bucket, &prefix).await?;
                Ok(())
            }
            _ => Err(VfsError::directory_not_empty(path)),
        }
    }

    async fn gzip(&self, opts: &CompressOptions, paths: &[String]) -> VfsResult<CompressResult> {
        let objects = self
            .resolve_objects(paths)
            .await?
            .into_iter()
            .filter(|o| {
                let compressed = o.key.ends_with(GZ_SUFFIX);
                if compressed {
                    warn!(key = %o.input(), "already has {GZ_SUFFIX} suffix, skipping");
                }
                !compressed
            })
            .map(|o| {
                let output = format!("{}{GZ_SUFFIX}", o.key);
                (o, output)
            })
            .collect();
        self.compress(opts.parallel.as_ref(), WorkerSpec::Gzip, objects)
            .await
    }

    async fn gunzip(&self, opts: &CompressOptions, paths: &[String]) -> VfsResult<CompressResult> {
        let objects = self
            .resolve_objects(paths)
            .await?
            .into_iter()
            .map(|o| {
                let output = strip_gz(&o.key)?.to_string();
                Ok((o, output))
            })
            .collect::<VfsResult<Vec<_>>>()?;
        self.compress(opts.parallel.as_ref(), WorkerSpec::Gunzip, objects)
            .await
    }
}
