//! Proxy-side command dispatcher.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::RemoteError;
use super::command::{DataReply, RemoteCommand, S3Request};
use crate::fetch::FetchClient;
use crate::vfs::{CopyPlan, CopySource, ErrorKind, Vfs, VfsError, VfsOps};

/// Decodes remote commands and runs them against native backends.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    vfs: Vfs,
    fetch: Option<Arc<FetchClient>>,
}

fn reply<T: Serialize>(value: T) -> Result<Value, RemoteError> {
    serde_json::to_value(value)
        .map_err(|e| RemoteError::new(ErrorKind::Internal, format!("failed to encode reply: {e}")))
}

fn remote(e: VfsError) -> RemoteError {
    e.to_remote()
}

impl Dispatcher {
    pub fn new(vfs: Vfs) -> Self {
        Self { vfs, fetch: None }
    }

    pub fn with_fetch(mut self, fetch: Arc<FetchClient>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// Parse and run one command.
    pub async fn dispatch(&self, command: &str, options: Value) -> Result<Value, RemoteError> {
        match RemoteCommand::parse(command, options)? {
            RemoteCommand::S3 { mount, request } => {
                debug!(%mount, op = %request.op(), "dispatch vfs-s3");
                let backend = self
                    .vfs
                    .table()
                    .get(&mount)
                    .ok_or_else(|| VfsError::no_mount_point(&mount).to_remote())?;
                self.s3(backend, request).await
            }
            RemoteCommand::Fetch { url, opts } => {
                debug!(%url, "dispatch fetch");
                let fetch = self.fetch.as_ref().ok_or_else(|| {
                    RemoteError::new(ErrorKind::Unsupported, "this proxy does not serve fetch")
                })?;
                let resp = fetch.fetch(&url, &opts).await.map_err(|e| e.to_remote())?;
                reply(resp)
            }
        }
    }

    async fn s3(&self, backend: Arc<dyn VfsOps>, request: S3Request) -> Result<Value, RemoteError> {
        match request {
            S3Request::Ls { opts, paths } => reply(backend.ls(&opts, &paths).await.map_err(remote)?),
            S3Request::Cp {
                opts,
                dst,
                sources,
                src_is_self,
                dst_is_self,
            } => {
                let plan = self
                    .plan(&backend, dst, sources, src_is_self, dst_is_self)
                    .map_err(remote)?;
                reply(backend.cp(&opts, &plan).await.map_err(remote)?)
            }
            S3Request::Rm { path, recursive } => {
                reply(backend.rm(&path, recursive).await.map_err(remote)?)
            }
            S3Request::Fstat {
                path,
                with_data,
                enoent_ok,
            } => reply(
                backend
                    .fstat(&path, with_data, enoent_ok)
                    .await
                    .map_err(remote)?,
            ),
            S3Request::Fslice {
                path,
                offset,
                length,
            } => {
                let data = backend.fslice(&path, offset, length).await.map_err(remote)?;
                reply(DataReply { data })
            }
            S3Request::Fwrite { path, data } => {
                backend.fwrite(&path, &data).await.map_err(remote)?;
                Ok(Value::Null)
            }
            S3Request::Mkdir { path } => {
                backend.mkdir(&path).await.map_err(remote)?;
                Ok(Value::Null)
            }
            S3Request::Rmdir { path } => {
                backend.rmdir(&path).await.map_err(remote)?;
                Ok(Value::Null)
            }
            S3Request::Grep {
                opts,
                pattern,
                paths,
            } => reply(backend.grep(&opts, &pattern, &paths).await.map_err(remote)?),
            S3Request::Gzip { opts, paths } => {
                reply(backend.gzip(&opts, &paths).await.map_err(remote)?)
            }
            S3Request::Gunzip { opts, paths } => {
                reply(backend.gunzip(&opts, &paths).await.map_err(remote)?)
            }
        }
    }

    /// Rebuild a copy plan against this side's registry.
    fn plan(
        &self,
        executor: &Arc<dyn VfsOps>,
        dst: String,
        sources: Vec<String>,
        src_is_self: Vec<bool>,
        dst_is_self: bool,
    ) -> Result<CopyPlan, VfsError> {
        let sources = sources
            .into_iter()
            .zip(src_is_self)
            .map(|(path, is_self)| {
                let backend = if is_self {
                    Arc::clone(executor)
                } else {
                    self.vfs.resolve(&path)?
                };
                Ok(CopySource {
                    path,
                    is_self,
                    backend,
                })
            })
            .collect::<Result<Vec<_>, VfsError>>()?;
        let dst_backend = if dst_is_self {
            Arc::clone(executor)
        } else {
            self.vfs.resolve(&dst)?
        };
        Ok(CopyPlan {
            sources,
            dst,
            dst_is_self,
            dst_backend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryObjectStore, ObjectStore};
    use crate::vfs::{MountTable, StorageMount, StorageResponder};
    use kumo_types::DirEntry;
    use serde_json::json;

    async fn dispatcher() -> (Dispatcher, Arc<MemoryObjectStore>) {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("photos", "2024/a.jpg", b"jpeg".to_vec());
        store.insert("photos", "2024/b.png", b"png".to_vec());
        let responder = StorageResponder::new(StorageMount::new("minio"), store.clone());
        let mut builder = MountTable::builder();
        builder.mount_backend(Arc::new(responder));
        let vfs = Vfs::new(builder.build().await.unwrap());
        (Dispatcher::new(vfs), store)
    }

    #[tokio::test]
    async fn test_vfs_s3_ls() {
        let (d, _) = dispatcher().await;
        let (line, options) = S3Request::Ls {
            opts: Default::default(),
            paths: vec!["/s3/minio/photos/2024/*.jpg".into()],
        }
        .encode("/s3/minio");
        let value = d.dispatch(&line, options).await.unwrap();
        let entries: Vec<DirEntry> = serde_json::from_value(value).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.jpg");
    }

    #[tokio::test]
    async fn test_unknown_mount() {
        let (d, _) = dispatcher().await;
        let err = d
            .dispatch("vfs-s3 ls %2Fs3%2Fnope %2Fs3%2Fnope", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.message.contains("no such backend"));
    }

    #[tokio::test]
    async fn test_fwrite_then_fslice() {
        let (d, store) = dispatcher().await;
        let (line, options) = S3Request::Fwrite {
            path: "/s3/minio/photos/new.txt".into(),
            data: b"hello world".to_vec(),
        }
        .encode("/s3/minio");
        assert_eq!(d.dispatch(&line, options).await.unwrap(), Value::Null);
        assert_eq!(store.get_object("photos", "new.txt").await.unwrap(), b"hello world");

        let (line, options) = S3Request::Fslice {
            path: "/s3/minio/photos/new.txt".into(),
            offset: 6,
            length: 5,
        }
        .encode("/s3/minio");
        let reply: DataReply = serde_json::from_value(d.dispatch(&line, options).await.unwrap()).unwrap();
        assert_eq!(reply.data, b"world");
    }

    #[tokio::test]
    async fn test_errors_keep_their_kind() {
        let (d, _) = dispatcher().await;
        let (line, options) = S3Request::Mkdir {
            path: "/s3/minio/Has_Underscore".into(),
        }
        .encode("/s3/minio");
        let err = d.dispatch(&line, options).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("underscore"));
    }

    #[tokio::test]
    async fn test_fetch_without_client() {
        let (d, _) = dispatcher().await;
        let err = d
            .dispatch("fetch https%3A%2F%2Fexample.com", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }
}
