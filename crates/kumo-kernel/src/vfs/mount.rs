//! VFS mount table with longest-prefix routing.
//!
//! Lifecycle: a [`MountTableBuilder`] collects backend initializers at
//! startup, [`MountTableBuilder::build`] runs them, and the resulting
//! [`MountTable`] is read-only for the rest of the process. There is no
//! unmount.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use kumo_types::DirEntry;
use kumo_types::backend::normalize_mount_path;
use tracing::debug;

use super::error::{VfsError, VfsResult};
use super::ops::VfsOps;

/// Deferred backend initializer.
pub type BackendFactory = Box<dyn FnOnce() -> BoxFuture<'static, VfsResult<Arc<dyn VfsOps>>> + Send>;

/// Collects mounts before the table is frozen.
#[derive(Default)]
pub struct MountTableBuilder {
    factories: BTreeMap<String, BackendFactory>,
}

impl std::fmt::Debug for MountTableBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTableBuilder")
            .field("mounts", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MountTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an initializer for the backend mounted at `path`.
    ///
    /// Registering the same mount path again replaces the earlier
    /// initializer.
    pub fn mount<F, Fut>(&mut self, path: impl AsRef<str>, factory: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = VfsResult<Arc<dyn VfsOps>>> + Send + 'static,
    {
        let path = normalize_mount_path(path.as_ref());
        let factory: BackendFactory = Box::new(move || Box::pin(factory()));
        if self.factories.insert(path.clone(), factory).is_some() {
            debug!(mount = %path, "replacing mount initializer");
        }
        self
    }

    /// Register an already-constructed backend at its own mount path.
    pub fn mount_backend(&mut self, backend: Arc<dyn VfsOps>) -> &mut Self {
        let path = backend.identity().mount_path.clone();
        self.mount(path, move || async move { Ok(backend) })
    }

    /// Number of registered mounts.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Run every initializer and freeze the table.
    ///
    /// Fails if an initializer fails or produces a backend whose identity
    /// disagrees with the path it was registered under.
    pub async fn build(self) -> VfsResult<MountTable> {
        let mut mounts = BTreeMap::new();
        for (path, factory) in self.factories {
            let backend = factory().await?;
            let declared = &backend.identity().mount_path;
            if *declared != path {
                return Err(VfsError::invalid_path(format!(
                    "backend for {path} declares mount path {declared}"
                )));
            }
            debug!(mount = %path, kind = %backend.identity().kind, "mounted");
            mounts.insert(path, backend);
        }
        Ok(MountTable { mounts })
    }
}

/// Read-only table of mounted backends.
///
/// Mount points are matched by longest prefix. If `/s3` and `/s3/minio` are
/// both mounted, `/s3/minio/photos/a.jpg` routes to `/s3/minio`.
#[derive(Clone, Default)]
pub struct MountTable {
    mounts: BTreeMap<String, Arc<dyn VfsOps>>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &self.mounts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MountTable {
    pub fn builder() -> MountTableBuilder {
        MountTableBuilder::new()
    }

    /// Find the backend owning `path`.
    pub fn resolve(&self, path: &str) -> VfsResult<Arc<dyn VfsOps>> {
        let normalized = normalize_query(path);

        // Keys iterate in order; a longer matching prefix always sorts after
        // a shorter one, so the last match wins.
        let mut best: Option<&Arc<dyn VfsOps>> = None;
        for (mount_path, backend) in &self.mounts {
            if covers(mount_path, &normalized) {
                best = Some(backend);
            }
        }

        best.cloned()
            .ok_or_else(|| VfsError::no_mount_point(path.to_string()))
    }

    /// Backend mounted exactly at `mount_path`.
    pub fn get(&self, mount_path: &str) -> Option<Arc<dyn VfsOps>> {
        self.mounts.get(&normalize_mount_path(mount_path)).cloned()
    }

    /// All mounts, ordered by mount path.
    pub fn mounts(&self) -> impl Iterator<Item = (&str, &Arc<dyn VfsOps>)> {
        self.mounts.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Directory entries for mount points strictly below `dir`.
    ///
    /// Listing `/` with mounts at `/local` and `/s3/minio` yields `local` and
    /// `s3`. Each entry is the next path component toward a mount.
    pub fn synthesize(&self, dir: &str) -> Vec<DirEntry> {
        let dir = normalize_mount_path(dir);
        let mut names = BTreeSet::new();
        for mount_path in self.mounts.keys() {
            if *mount_path == dir {
                continue;
            }
            let rest = if dir == "/" {
                mount_path.strip_prefix('/')
            } else {
                mount_path
                    .strip_prefix(dir.as_str())
                    .and_then(|r| r.strip_prefix('/'))
            };
            if let Some(first) = rest.and_then(|r| r.split('/').next())
                && !first.is_empty()
            {
                names.insert(first.to_string());
            }
        }

        names
            .into_iter()
            .map(|name| {
                let path = if dir == "/" {
                    format!("/{name}")
                } else {
                    format!("{dir}/{name}")
                };
                DirEntry::directory(name, path, 0)
            })
            .collect()
    }
}

fn normalize_query(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn covers(mount_path: &str, path: &str) -> bool {
    mount_path == "/"
        || path == mount_path
        || path
            .strip_prefix(mount_path)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::testing::StubBackend;

    async fn table(paths: &[&str]) -> MountTable {
        let mut builder = MountTable::builder();
        for p in paths {
            builder.mount_backend(Arc::new(StubBackend::new(*p)));
        }
        builder.build().await.unwrap()
    }

    #[tokio::test]
    async fn test_longest_prefix() {
        let t = table(&["/s3", "/s3/minio", "/local"]).await;
        assert_eq!(
            t.resolve("/s3/minio/photos/a.jpg").unwrap().identity().mount_path,
            "/s3/minio"
        );
        assert_eq!(t.resolve("/s3/other/x").unwrap().identity().mount_path, "/s3");
        assert_eq!(t.resolve("/s3/minio").unwrap().identity().mount_path, "/s3/minio");
        assert_eq!(t.resolve("local/a").unwrap().identity().mount_path, "/local");
    }

    #[tokio::test]
    async fn test_prefix_must_end_on_component() {
        let t = table(&["/s3/minio"]).await;
        assert!(t.resolve("/s3/minion/x").is_err());
    }

    #[tokio::test]
    async fn test_no_mount_point() {
        let t = table(&["/local"]).await;
        let err = t.resolve("/nowhere/file").err().unwrap();
        assert!(matches!(err, VfsError::NoMountPoint(_)));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_root_mount_catches_all() {
        let t = table(&["/", "/s3/minio"]).await;
        assert_eq!(t.resolve("/etc/hosts").unwrap().identity().mount_path, "/");
        assert_eq!(
            t.resolve("/s3/minio/b").unwrap().identity().mount_path,
            "/s3/minio"
        );
    }

    #[tokio::test]
    async fn test_reregister_replaces() {
        let mut builder = MountTable::builder();
        builder.mount("/s3/minio", || async {
            Err::<Arc<dyn VfsOps>, _>(VfsError::other("first initializer"))
        });
        builder.mount("/s3/minio/", || async {
            Ok(Arc::new(StubBackend::new("/s3/minio")) as Arc<dyn VfsOps>)
        });
        assert_eq!(builder.len(), 1);
        let t = builder.build().await.unwrap();
        assert!(t.get("/s3/minio").is_some());
    }

    #[tokio::test]
    async fn test_mismatched_identity_rejected() {
        let mut builder = MountTable::builder();
        builder.mount("/a", || async {
            Ok(Arc::new(StubBackend::new("/b")) as Arc<dyn VfsOps>)
        });
        assert!(builder.build().await.is_err());
    }

    #[tokio::test]
    async fn test_synthesize_root() {
        let t = table(&["/local", "/s3/minio", "/s3/aws"]).await;
        let names: Vec<_> = t.synthesize("/").into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["local", "s3"]);

        let under_s3 = t.synthesize("/s3");
        let names: Vec<_> = under_s3.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["aws", "minio"]);
        assert_eq!(under_s3[0].path, "/s3/aws");
        assert!(under_s3.iter().all(|e| e.is_dir()));
    }
}
