//! VFS backends.
//!
//! Backends implement [`VfsOps`](super::VfsOps) for different storage types.

pub mod content;
pub mod local;
pub mod s3;

#[cfg(test)]
pub(crate) mod testing {
    //! Recording backend for routing tests.

    use async_trait::async_trait;
    use kumo_types::{CompressResult, CopyOutcome, DirEntry, FStat, GrepResult, MountIdentity};
    use parking_lot::Mutex;

    use crate::vfs::{
        CompressOptions, CopyOptions, CopyPlan, GrepOptions, LsOptions, VfsError, VfsOps,
        VfsResult, basename,
    };

    /// Echoes its inputs back and records every call as `op:arg`.
    pub struct StubBackend {
        identity: MountIdentity,
        pub calls: Mutex<Vec<String>>,
    }

    impl StubBackend {
        pub fn new(mount_path: &str) -> Self {
            Self::with_identity(MountIdentity::local(mount_path))
        }

        pub fn remote(mount_path: &str) -> Self {
            Self::with_identity(MountIdentity::object_storage(mount_path))
        }

        fn with_identity(identity: MountIdentity) -> Self {
            Self {
                identity,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, op: &str, arg: &str) {
            self.calls.lock().push(format!("{op}:{arg}"));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl VfsOps for StubBackend {
        fn identity(&self) -> &MountIdentity {
            &self.identity
        }

        async fn ls(&self, _opts: &LsOptions, paths: &[String]) -> VfsResult<Vec<DirEntry>> {
            Ok(paths
                .iter()
                .map(|p| {
                    self.record("ls", p);
                    DirEntry::file(basename(p), p.clone(), 0, 0)
                })
                .collect())
        }

        async fn fstat(
            &self,
            path: &str,
            _with_data: bool,
            enoent_ok: bool,
        ) -> VfsResult<Option<FStat>> {
            self.record("fstat", path);
            if enoent_ok {
                Ok(None)
            } else {
                Err(VfsError::not_found(path))
            }
        }

        async fn fslice(&self, path: &str, _offset: u64, _length: u64) -> VfsResult<Vec<u8>> {
            self.record("fslice", path);
            Ok(Vec::new())
        }

        async fn grep(
            &self,
            _opts: &GrepOptions,
            _pattern: &str,
            paths: &[String],
        ) -> VfsResult<GrepResult> {
            for p in paths {
                self.record("grep", p);
            }
            Ok(GrepResult::Count(paths.len() as u64))
        }

        async fn fwrite(&self, path: &str, _data: &[u8]) -> VfsResult<()> {
            self.record("fwrite", path);
            Ok(())
        }

        async fn cp(&self, _opts: &CopyOptions, plan: &CopyPlan) -> VfsResult<CopyOutcome> {
            let mut copied = Vec::new();
            for src in &plan.sources {
                let flag = if src.is_self { "self" } else { "other" };
                self.record("cp", &format!("{}({flag})->{}", src.path, plan.dst));
                copied.push(src.path.clone());
            }
            Ok(CopyOutcome { copied })
        }

        async fn rm(&self, path: &str, _recursive: bool) -> VfsResult<bool> {
            self.record("rm", path);
            Ok(true)
        }

        async fn mkdir(&self, path: &str) -> VfsResult<()> {
            self.record("mkdir", path);
            Ok(())
        }

        async fn rmdir(&self, path: &str) -> VfsResult<()> {
            self.record("rmdir", path);
            Ok(())
        }

        async fn gzip(
            &self,
            _opts: &CompressOptions,
            paths: &[String],
        ) -> VfsResult<CompressResult> {
            Ok(CompressResult {
                outputs: paths.iter().map(|p| format!("{p}.gz")).collect(),
                job_id: None,
            })
        }

        async fn gunzip(
            &self,
            _opts: &CompressOptions,
            paths: &[String],
        ) -> VfsResult<CompressResult> {
            Ok(CompressResult {
                outputs: paths
                    .iter()
                    .map(|p| p.trim_end_matches(".gz").to_string())
                    .collect(),
                job_id: None,
            })
        }
    }
}
