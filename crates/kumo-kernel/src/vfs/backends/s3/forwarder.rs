//! Object-storage backend for sandboxed callers.
//!
//! Holds no storage client. Every operation becomes one `vfs-s3` command on
//! the remote channel; the proxy runs it against its own responder and the
//! reply (or error, kind preserved) comes back unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use kumo_types::{CompressResult, CopyOutcome, DirEntry, FStat, GrepResult, MountIdentity};
use serde::de::DeserializeOwned;
use tracing::trace;

use super::StorageMount;
use crate::rexec::{DataReply, RemoteExec, S3Request};
use crate::vfs::{
    CompressOptions, CopyOptions, CopyPlan, GrepOptions, LsOptions, VfsError, VfsOps, VfsResult,
};

/// Forwards object-storage operations to a proxy.
pub struct StorageForwarder {
    mount: StorageMount,
    exec: Arc<dyn RemoteExec>,
}

impl std::fmt::Debug for StorageForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageForwarder")
            .field("mount", &self.mount.mount_path())
            .finish_non_exhaustive()
    }
}

impl StorageForwarder {
    pub fn new(mount: StorageMount, exec: Arc<dyn RemoteExec>) -> Self {
        Self { mount, exec }
    }

    async fn send<T: DeserializeOwned>(&self, request: S3Request) -> VfsResult<T> {
        let op = request.op();
        let (line, options) = request.encode(self.mount.mount_path());
        trace!(%line, "forwarding");
        let reply = self.exec.exec(&line, options).await?;
        serde_json::from_value(reply)
            .map_err(|e| VfsError::other(format!("bad {op} reply from proxy: {e}")))
    }

    /// For ops whose reply carries nothing.
    async fn send_unit(&self, request: S3Request) -> VfsResult<()> {
        let op = request.op();
        let (line, options) = request.encode(self.mount.mount_path());
        trace!(%line, "forwarding");
        self.exec.exec(&line, options).await?;
        trace!(%op, "done");
        Ok(())
    }
}

#[async_trait]
impl VfsOps for StorageForwarder {
    fn identity(&self) -> &MountIdentity {
        self.mount.identity()
    }

    async fn ls(&self, opts: &LsOptions, paths: &[String]) -> VfsResult<Vec<DirEntry>> {
        self.send(S3Request::Ls {
            opts: opts.clone(),
            paths: paths.to_vec(),
        })
        .await
    }

    async fn fstat(&self, path: &str, with_data: bool, enoent_ok: bool) -> VfsResult<Option<FStat>> {
        self.send(S3Request::Fstat {
            path: path.to_string(),
            with_data,
            enoent_ok,
        })
        .await
    }

    async fn fslice(&self, path: &str, offset: u64, length: u64) -> VfsResult<Vec<u8>> {
        let reply: DataReply = self
            .send(S3Request::Fslice {
                path: path.to_string(),
                offset,
                length,
            })
            .await?;
        Ok(reply.data)
    }

    async fn grep(&self, opts: &GrepOptions, pattern: &str, paths: &[String]) -> VfsResult<GrepResult> {
        self.send(S3Request::Grep {
            opts: opts.clone(),
            pattern: pattern.to_string(),
            paths: paths.to_vec(),
        })
        .await
    }

    async fn fwrite(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        self.send_unit(S3Request::Fwrite {
            path: path.to_string(),
            data: data.to_vec(),
        })
        .await
    }

    async fn cp(&self, opts: &CopyOptions, plan: &CopyPlan) -> VfsResult<CopyOutcome> {
        self.send(S3Request::Cp {
            opts: opts.clone(),
            dst: plan.dst.clone(),
            sources: plan.sources.iter().map(|s| s.path.clone()).collect(),
            src_is_self: plan.sources.iter().map(|s| s.is_self).collect(),
            dst_is_self: plan.dst_is_self,
        })
        .await
    }

    async fn rm(&self, path: &str, recursive: bool) -> VfsResult<bool> {
        self.send(S3Request::Rm {
            path: path.to_string(),
            recursive,
        })
        .await
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.send_unit(S3Request::Mkdir {
            path: path.to_string(),
        })
        .await
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.send_unit(S3Request::Rmdir {
            path: path.to_string(),
        })
        .await
    }

    async fn gzip(&self, opts: &CompressOptions, paths: &[String]) -> VfsResult<CompressResult> {
        self.send(S3Request::Gzip {
            opts: opts.clone(),
            paths: paths.to_vec(),
        })
        .await
    }

    async fn gunzip(&self, opts: &CompressOptions, paths: &[String]) -> VfsResult<CompressResult> {
        self.send(S3Request::Gunzip {
            opts: opts.clone(),
            paths: paths.to_vec(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rexec::{Dispatcher, LoopbackExec};
    use crate::storage::{MemoryObjectStore, ObjectStore};
    use crate::vfs::{CopySource, ErrorKind, MountTable, StorageResponder, Vfs};

    struct Pair {
        native: Arc<StorageResponder>,
        forwarded: Arc<StorageForwarder>,
        store: Arc<MemoryObjectStore>,
    }

    async fn pair() -> Pair {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("photos", "a.jpg", b"A".to_vec());
        store.insert("photos", "2024/c.jpg", b"C".to_vec());
        store.insert("logs", "app.log", b"ok\nerror: disk\n".to_vec());

        let native = Arc::new(StorageResponder::new(StorageMount::new("minio"), store.clone()));
        let mut builder = MountTable::builder();
        builder.mount_backend(native.clone());
        let dispatcher = Dispatcher::new(Vfs::new(builder.build().await.unwrap()));
        let exec = Arc::new(LoopbackExec::new(Arc::new(dispatcher)));
        let forwarded = Arc::new(StorageForwarder::new(StorageMount::new("minio"), exec));
        Pair {
            native,
            forwarded,
            store,
        }
    }

    #[tokio::test]
    async fn test_results_match_native() {
        let Pair {
            native, forwarded, ..
        } = pair().await;
        let opts = LsOptions::default();
        for path in ["/s3/minio", "/s3/minio/photos", "/s3/minio/photos/*.jpg"] {
            let paths = vec![path.to_string()];
            assert_eq!(
                forwarded.ls(&opts, &paths).await.unwrap(),
                native.ls(&opts, &paths).await.unwrap(),
                "{path}"
            );
        }
        let stat = forwarded
            .fstat("/s3/minio/logs/app.log", true, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.data.as_deref(), Some(&b"ok\nerror: disk\n"[..]));
        assert!(
            forwarded
                .fstat("/s3/minio/logs/nope", false, true)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            forwarded.fslice("/s3/minio/logs/app.log", 3, 5).await.unwrap(),
            b"error"
        );
    }

    #[tokio::test]
    async fn test_errors_keep_their_kind() {
        let Pair { forwarded, .. } = pair().await;
        let err = forwarded.rm("/s3/minio/photos", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("recursive"));

        let err = forwarded.ls(&LsOptions::default(), &["/s3/minio/ghost/x".into()]).await.unwrap_err();
        assert!(err.is_not_found());

        let err = forwarded
            .grep(&GrepOptions::default(), "panic", &["/s3/minio/logs/app.log".into()])
            .await
            .unwrap_err();
        assert!(err.is_no_matches());
    }

    #[tokio::test]
    async fn test_writes_reach_the_store() {
        let Pair {
            forwarded, store, ..
        } = pair().await;
        forwarded.mkdir("/s3/minio/archive").await.unwrap();
        forwarded
            .fwrite("/s3/minio/archive/note.txt", b"hi")
            .await
            .unwrap();
        assert_eq!(store.get_object("archive", "note.txt").await.unwrap(), b"hi");

        let backend: Arc<dyn VfsOps> = forwarded.clone();
        let plan = CopyPlan {
            sources: vec![CopySource {
                path: "/s3/minio/photos/a.jpg".into(),
                is_self: true,
                backend: Arc::clone(&backend),
            }],
            dst: "/s3/minio/archive/".into(),
            dst_is_self: true,
            dst_backend: backend,
        };
        let out = forwarded.cp(&CopyOptions::default(), &plan).await.unwrap();
        assert_eq!(out.copied, vec!["/s3/minio/archive/a.jpg"]);
        assert_eq!(store.get_object("archive", "a.jpg").await.unwrap(), b"A");

        let out = forwarded
            .gzip(&CompressOptions::default(), &["/s3/minio/archive/note.txt".into()])
            .await
            .unwrap();
        assert_eq!(out.outputs, vec!["/s3/minio/archive/note.txt.gz"]);
        assert!(forwarded.rm("/s3/minio/archive", true).await.unwrap());
        assert!(!store.bucket_exists("archive").await.unwrap());
    }
}
