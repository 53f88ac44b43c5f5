//! Local filesystem backend.
//!
//! Provides access to real filesystem paths under a namespace mount, with
//! path security to prevent escaping the root directory.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use kumo_types::dir_entry::permission_string;
use kumo_types::{CompressResult, CopyOutcome, DirEntry, FStat, FileMatches, GrepResult, MountIdentity};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::glob::{contains_glob, glob_match};
use crate::vfs::backends::content::{
    GZ_SUFFIX, build_matcher, gunzip_bytes, gzip_bytes, matching_lines, shape_grep, strip_gz,
};
use crate::vfs::{
    CompressOptions, CopyOptions, CopyPlan, CopySource, GrepOptions, LsOptions, ParallelOptions,
    VfsError, VfsOps, VfsResult, basename, fills_directory, join_path,
};

/// Local filesystem backend.
///
/// All operations are relative to `root`. With the mount at `/local` and
/// `root` at `/home/amy/project`, `/local/src/main.rs` reads
/// `/home/amy/project/src/main.rs`.
///
/// Path security is enforced: attempts to escape via `..` or symlinks are
/// blocked.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    identity: MountIdentity,
    root: PathBuf,
    read_only: bool,
}

/// A resolved path: namespace form and disk form.
#[derive(Debug, Clone)]
struct Located {
    ns: String,
    disk: PathBuf,
}

/// A file to copy and its name under the destination directory.
struct Transfer {
    source: Source,
    name: String,
}

enum Source {
    Disk(PathBuf),
    Foreign {
        backend: Arc<dyn VfsOps>,
        path: String,
    },
}

/// Map an I/O error, naming `path` for the common cases.
fn io_error(path: &str) -> impl Fn(io::Error) -> VfsError + '_ {
    move |e| match e.kind() {
        io::ErrorKind::NotFound => VfsError::not_found(path),
        io::ErrorKind::AlreadyExists => VfsError::already_exists(path),
        io::ErrorKind::IsADirectory => VfsError::is_a_directory(path),
        io::ErrorKind::NotADirectory => VfsError::not_a_directory(path),
        io::ErrorKind::DirectoryNotEmpty => VfsError::directory_not_empty(path),
        _ => VfsError::Io(e),
    }
}

/// Split a relative path whose final segment is a glob.
fn split_glob(rel: &str) -> Option<(&str, &str)> {
    let (dir, last) = rel.rsplit_once('/').unwrap_or(("", rel));
    (contains_glob(last) && !contains_glob(dir)).then_some((dir, last))
}

fn no_offload(par: Option<&ParallelOptions>) -> VfsResult<()> {
    match par {
        Some(_) => Err(VfsError::unsupported(
            "data-parallel offload is only available on object-storage mounts",
        )),
        None => Ok(()),
    }
}

impl LocalBackend {
    /// Mount `root` at namespace path `mount_path`.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(mount_path: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            identity: MountIdentity::local(mount_path),
            root,
            read_only: false,
        }
    }

    /// Set whether this filesystem is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn relative<'a>(&self, path: &'a str) -> VfsResult<&'a str> {
        self.identity.relative(path).ok_or_else(|| {
            VfsError::invalid_path(format!("{path} is not under {}", self.identity.mount_path))
        })
    }

    /// Resolve a namespace path to a disk path within the root.
    ///
    /// Returns an error if the path escapes the root.
    async fn resolve(&self, path: &str) -> VfsResult<Located> {
        let rel = self.relative(path)?;
        Ok(Located {
            ns: self.identity.absolute(rel),
            disk: self.resolve_rel(rel).await?,
        })
    }

    async fn resolve_rel(&self, rel: &str) -> VfsResult<PathBuf> {
        if rel.is_empty() {
            return Ok(self.root.clone());
        }
        let full = self.root.join(rel);

        // Canonicalize to resolve symlinks and `..`. New files canonicalize
        // their nearest existing ancestor.
        let mut existing = full.as_path();
        let mut tail = Vec::new();
        while !fs::try_exists(existing).await.unwrap_or(false) {
            let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                break;
            };
            tail.push(name.to_owned());
            existing = parent;
        }
        let mut canonical = fs::canonicalize(existing)
            .await
            .unwrap_or_else(|_| existing.to_path_buf());
        for name in tail.iter().rev() {
            canonical.push(name);
        }

        let escapes = canonical
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes || !canonical.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }
        Ok(canonical)
    }

    /// Convert metadata into a listing entry.
    fn entry(name: &str, ns: String, meta: &std::fs::Metadata) -> DirEntry {
        let mtime_ms = meta.mtime() * 1000 + meta.mtime_nsec() / 1_000_000;
        let mut entry = if meta.is_dir() {
            DirEntry::directory(name, ns, mtime_ms)
        } else {
            DirEntry::file(name, ns, meta.len(), mtime_ms)
        };
        entry.stats.mode = meta.mode();
        entry.stats.uid = meta.uid();
        entry.stats.gid = meta.gid();
        entry.dirent.permissions = permission_string(meta.mode());
        entry.dirent.is_symbolic_link = meta.file_type().is_symlink();
        entry.dirent.is_file = meta.is_file();
        entry.dirent.is_special = !meta.is_file() && !meta.is_dir() && !meta.file_type().is_symlink();
        entry.dirent.is_executable = meta.is_file() && meta.mode() & 0o111 != 0;
        entry
    }

    async fn read_dir(&self, dir: &Located) -> VfsResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut rd = fs::read_dir(&dir.disk).await.map_err(io_error(&dir.ns))?;
        while let Some(item) = rd.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            let meta = fs::symlink_metadata(item.path()).await?;
            entries.push(Self::entry(&name, join_path(&dir.ns, &name), &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Entries of the directory part of `rel` whose names match `pattern`.
    async fn glob(&self, dir_rel: &str, pattern: &str) -> VfsResult<Vec<DirEntry>> {
        let dir = Located {
            ns: self.identity.absolute(dir_rel),
            disk: self.resolve_rel(dir_rel).await?,
        };
        Ok(self
            .read_dir(&dir)
            .await?
            .into_iter()
            .filter(|e| glob_match(pattern, &e.name))
            .collect())
    }

    async fn ls_one(&self, opts: &LsOptions, path: &str) -> VfsResult<Vec<DirEntry>> {
        let rel = self.relative(path)?;
        if let Some((dir, pattern)) = split_glob(rel) {
            let found = self.glob(dir, pattern).await?;
            if found.is_empty() {
                return Err(VfsError::not_found(path));
            }
            return Ok(found);
        }
        let loc = self.resolve(path).await?;
        let meta = fs::symlink_metadata(&loc.disk).await.map_err(io_error(path))?;
        if meta.is_dir() && !opts.directory {
            return self.read_dir(&loc).await;
        }
        let name = if rel.is_empty() {
            basename(&self.identity.mount_path)
        } else {
            basename(rel)
        };
        Ok(vec![Self::entry(name, loc.ns, &meta)])
    }

    /// Files named by `paths`, globs expanded. Directories are rejected.
    async fn files(&self, paths: &[String]) -> VfsResult<Vec<Located>> {
        let mut out = Vec::new();
        for path in paths {
            let rel = self.relative(path)?;
            if let Some((dir, pattern)) = split_glob(rel) {
                let found: Vec<_> = self
                    .glob(dir, pattern)
                    .await?
                    .into_iter()
                    .filter(|e| !e.is_dir())
                    .collect();
                if found.is_empty() {
                    return Err(VfsError::not_found(path.clone()));
                }
                for e in found {
                    out.push(Located {
                        disk: self.resolve_rel(&join_path(dir, &e.name)).await?,
                        ns: e.path,
                    });
                }
                continue;
            }
            let loc = self.resolve(path).await?;
            if fs::metadata(&loc.disk).await.map_err(io_error(path))?.is_dir() {
                return Err(VfsError::is_a_directory(path.clone()));
            }
            out.push(loc);
        }
        Ok(out)
    }

    /// Every file below `dir`, named relative to `prefix`.
    async fn walk(&self, dir: PathBuf, prefix: String) -> VfsResult<Vec<Transfer>> {
        let mut out = Vec::new();
        let mut pending = vec![(dir, prefix)];
        while let Some((dir, prefix)) = pending.pop() {
            let mut rd = fs::read_dir(&dir).await?;
            while let Some(item) = rd.next_entry().await? {
                let name = join_path(&prefix, &item.file_name().to_string_lossy());
                if item.file_type().await?.is_dir() {
                    pending.push((item.path(), name));
                } else {
                    out.push(Transfer {
                        source: Source::Disk(item.path()),
                        name,
                    });
                }
            }
        }
        Ok(out)
    }

    async fn expand_source(
        &self,
        opts: &CopyOptions,
        src: &CopySource,
    ) -> VfsResult<Vec<Transfer>> {
        if !src.is_self {
            return Ok(vec![Transfer {
                source: Source::Foreign {
                    backend: Arc::clone(&src.backend),
                    path: src.path.clone(),
                },
                name: basename(&src.path).to_string(),
            }]);
        }
        let rel = self.relative(&src.path)?;
        if split_glob(rel).is_some() {
            return Ok(self
                .files(std::slice::from_ref(&src.path))
                .await?
                .into_iter()
                .map(|loc| Transfer {
                    name: basename(&loc.ns).to_string(),
                    source: Source::Disk(loc.disk),
                })
                .collect());
        }
        let loc = self.resolve(&src.path).await?;
        let meta = fs::metadata(&loc.disk).await.map_err(io_error(&src.path))?;
        if !meta.is_dir() {
            return Ok(vec![Transfer {
                name: basename(&loc.ns).to_string(),
                source: Source::Disk(loc.disk),
            }]);
        }
        if !opts.recursive {
            return Err(VfsError::is_a_directory(src.path.clone()));
        }
        self.walk(loc.disk, basename(&loc.ns).to_string()).await
    }

    async fn gz(
        &self,
        par: Option<&ParallelOptions>,
        paths: &[String],
        compress: bool,
    ) -> VfsResult<CompressResult> {
        self.check_writable()?;
        no_offload(par)?;
        let mut work = Vec::new();
        for loc in self.files(paths).await? {
            if compress {
                if loc.ns.ends_with(GZ_SUFFIX) {
                    warn!(path = %loc.ns, "already has {GZ_SUFFIX} suffix, skipping");
                    continue;
                }
                let mut disk = loc.disk.clone().into_os_string();
                disk.push(GZ_SUFFIX);
                work.push((format!("{}{GZ_SUFFIX}", loc.ns), PathBuf::from(disk), loc));
            } else {
                let ns_out = strip_gz(&loc.ns)?.to_string();
                let disk_out = loc.disk.with_extension("");
                work.push((ns_out, disk_out, loc));
            }
        }
        let jobs = work.into_iter().map(|(ns_out, disk_out, loc)| async move {
            let data = fs::read(&loc.disk).await.map_err(io_error(&loc.ns))?;
            let data = if compress {
                gzip_bytes(&data)?
            } else {
                gunzip_bytes(&data)?
            };
            fs::write(&disk_out, data).await?;
            fs::remove_file(&loc.disk).await?;
            Ok::<_, VfsError>(ns_out)
        });
        Ok(CompressResult {
            outputs: try_join_all(jobs).await?,
            job_id: None,
        })
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    fn identity(&self) -> &MountIdentity {
        &self.identity
    }

    async fn ls(&self, opts: &LsOptions, paths: &[String]) -> VfsResult<Vec<DirEntry>> {
        let listed = try_join_all(paths.iter().map(|p| self.ls_one(opts, p))).await?;
        Ok(listed.into_iter().flatten().collect())
    }

    async fn fstat(&self, path: &str, with_data: bool, enoent_ok: bool) -> VfsResult<Option<FStat>> {
        let loc = self.resolve(path).await?;
        let meta = match fs::metadata(&loc.disk).await {
            Ok(meta) => meta,
            Err(e) if enoent_ok && e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path)(e)),
        };
        if meta.is_dir() {
            return Ok(Some(FStat::directory(loc.ns)));
        }
        let stat = FStat::file(loc.ns, meta.len());
        if with_data {
            let data = fs::read(&loc.disk).await.map_err(io_error(path))?;
            return Ok(Some(stat.with_data(data)));
        }
        Ok(Some(stat))
    }

    async fn fslice(&self, path: &str, offset: u64, length: u64) -> VfsResult<Vec<u8>> {
        use tokio::io::AsyncSeekExt;

        let loc = self.resolve(path).await?;
        let mut file = fs::File::open(&loc.disk).await.map_err(io_error(path))?;
        file.seek(io::SeekFrom::Start(offset)).await?;
        let mut buffer = Vec::new();
        file.take(length).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    async fn grep(&self, opts: &GrepOptions, pattern: &str, paths: &[String]) -> VfsResult<GrepResult> {
        no_offload(opts.parallel.as_ref())?;
        let re = build_matcher(pattern, opts.ignore_case)?;
        let re = &re;
        let files = self.files(paths).await?;
        let per_file = try_join_all(files.into_iter().map(|loc| async move {
            let data = fs::read(&loc.disk).await.map_err(io_error(&loc.ns))?;
            Ok::<_, VfsError>(FileMatches {
                lines: matching_lines(re, &data),
                path: loc.ns,
            })
        }))
        .await?;
        shape_grep(opts, pattern, per_file)
    }

    async fn fwrite(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        self.check_writable()?;
        let loc = self.resolve(path).await?;
        if let Some(parent) = loc.disk.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&loc.disk, data).await.map_err(io_error(path))
    }

    async fn cp(&self, opts: &CopyOptions, plan: &CopyPlan) -> VfsResult<CopyOutcome> {
        self.check_writable()?;
        if !plan.dst_is_self {
            return Err(VfsError::unsupported(format!(
                "{}: local mounts only copy into themselves",
                self.identity.mount_path
            )));
        }
        let expanded = try_join_all(plan.sources.iter().map(|s| self.expand_source(opts, s))).await?;
        let transfers: Vec<Transfer> = expanded.into_iter().flatten().collect();

        let dst = self.resolve(&plan.dst).await?;
        let dst_meta = fs::metadata(&dst.disk).await.ok();
        let fills = fills_directory(transfers.iter().map(|t| t.name.as_str()));
        let into_dir = plan.dst.ends_with('/')
            || dst_meta.as_ref().is_some_and(|m| m.is_dir())
            || (dst_meta.is_none() && fills);
        if !into_dir && fills {
            return Err(VfsError::destination_not_directory(plan.dst.clone()));
        }
        debug!(dst = %dst.ns, transfers = transfers.len(), into_dir, "local cp");

        let dst = &dst;
        let copies = transfers.into_iter().map(|t| async move {
            let (ns, disk) = if into_dir {
                (join_path(&dst.ns, &t.name), dst.disk.join(&t.name))
            } else {
                (dst.ns.clone(), dst.disk.clone())
            };
            if let Some(parent) = disk.parent() {
                fs::create_dir_all(parent).await?;
            }
            match t.source {
                Source::Disk(src) => {
                    fs::copy(&src, &disk).await.map_err(io_error(&ns))?;
                }
                Source::Foreign { backend, path } => {
                    let data = backend.read_all(&path).await?;
                    fs::write(&disk, data).await?;
                }
            }
            Ok::<_, VfsError>(ns)
        });
        Ok(CopyOutcome {
            copied: try_join_all(copies).await?,
        })
    }

    async fn rm(&self, path: &str, recursive: bool) -> VfsResult<bool> {
        self.check_writable()?;
        let rel = self.relative(path)?;
        if rel.is_empty() {
            return Err(VfsError::invalid_path(format!(
                "{path}: refusing to remove the mount root"
            )));
        }
        let targets: Vec<(String, PathBuf, bool)> = if let Some((dir, pattern)) = split_glob(rel) {
            let found = self.glob(dir, pattern).await?;
            if found.is_empty() {
                return Err(VfsError::not_found(path));
            }
            let mut out = Vec::with_capacity(found.len());
            for e in found {
                let disk = self.resolve_rel(&join_path(dir, &e.name)).await?;
                out.push((e.path.clone(), disk, e.is_dir()));
            }
            out
        } else {
            let loc = self.resolve(path).await?;
            let meta = fs::symlink_metadata(&loc.disk).await.map_err(io_error(path))?;
            vec![(loc.ns, loc.disk, meta.is_dir())]
        };

        for (ns, disk, is_dir) in &targets {
            if *is_dir && !recursive {
                return Err(VfsError::is_a_directory(ns.clone()));
            }
            debug!(path = %ns, is_dir, "rm");
            if *is_dir {
                fs::remove_dir_all(disk).await.map_err(io_error(ns))?;
            } else {
                fs::remove_file(disk).await.map_err(io_error(ns))?;
            }
        }
        Ok(true)
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let loc = self.resolve(path).await?;
        fs::create_dir_all(&loc.disk).await.map_err(io_error(path))
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let loc = self.resolve(path).await?;
        if loc.disk == self.root {
            return Err(VfsError::invalid_path(format!(
                "{path}: refusing to remove the mount root"
            )));
        }
        fs::remove_dir(&loc.disk).await.map_err(io_error(path))
    }

    async fn gzip(&self, opts: &CompressOptions, paths: &[String]) -> VfsResult<CompressResult> {
        self.gz(opts.parallel.as_ref(), paths, true).await
    }

    async fn gunzip(&self, opts: &CompressOptions, paths: &[String]) -> VfsResult<CompressResult> {
        self.gz(opts.parallel.as_ref(), paths, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::CopySource;
    use tempfile::TempDir;

    fn setup() -> (Arc<LocalBackend>, TempDir) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();
        std::fs::write(dir.path().join("todo.txt"), "gamma\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/deep.log"), "error: x\n").unwrap();
        (Arc::new(LocalBackend::new("/local", dir.path())), dir)
    }

    fn names(entries: &[DirEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn plan(b: &Arc<LocalBackend>, sources: &[&str], dst: &str) -> CopyPlan {
        let backend: Arc<dyn VfsOps> = b.clone();
        CopyPlan {
            sources: sources
                .iter()
                .map(|s| CopySource {
                    path: s.to_string(),
                    is_self: true,
                    backend: Arc::clone(&backend),
                })
                .collect(),
            dst: dst.to_string(),
            dst_is_self: true,
            dst_backend: backend,
        }
    }

    #[tokio::test]
    async fn test_ls_root_and_glob() {
        let (b, _dir) = setup();
        let entries = b.ls(&LsOptions::default(), &["/local".into()]).await.unwrap();
        assert_eq!(names(&entries), vec!["notes.txt", "sub", "todo.txt"]);
        assert_eq!(entries[0].path, "/local/notes.txt");
        assert!(entries[1].is_dir());
        assert_eq!(entries[0].dirent.permissions.len(), 10);

        let entries = b.ls(&LsOptions::default(), &["/local/*.txt".into()]).await.unwrap();
        assert_eq!(names(&entries), vec!["notes.txt", "todo.txt"]);

        let d = LsOptions { directory: true };
        let entries = b.ls(&d, &["/local/sub".into()]).await.unwrap();
        assert_eq!(names(&entries), vec!["sub"]);
    }

    #[tokio::test]
    async fn test_write_and_partial_read() {
        let (b, _dir) = setup();
        b.fwrite("/local/new/dir/file.txt", b"hello world").await.unwrap();
        assert_eq!(b.fslice("/local/new/dir/file.txt", 6, 5).await.unwrap(), b"world");
        assert_eq!(b.fslice("/local/new/dir/file.txt", 6, 500).await.unwrap(), b"world");
        assert_eq!(b.read_all("/local/new/dir/file.txt").await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_fstat_enoent_ok() {
        let (b, _dir) = setup();
        assert!(b.fstat("/local/missing", false, true).await.unwrap().is_none());
        assert!(b.fstat("/local/missing", false, false).await.unwrap_err().is_not_found());
        assert!(b.fstat("/local/sub", false, false).await.unwrap().unwrap().is_directory);
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (b, _dir) = setup();
        let err = b.fslice("/local/../../../etc/passwd", 0, 100).await.unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
        let err = b.fwrite("/local/../outside.txt", b"x").await.unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
    }

    #[tokio::test]
    async fn test_read_only() {
        let dir = TempDir::new().unwrap();
        let mut b = LocalBackend::new("/local", dir.path());
        b.set_read_only(true);
        assert!(matches!(b.fwrite("/local/x", b"x").await, Err(VfsError::ReadOnly)));
        assert!(matches!(b.mkdir("/local/d").await, Err(VfsError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_cp_many_requires_directory() {
        let (b, dir) = setup();
        let p = plan(&b, &["/local/notes.txt", "/local/todo.txt"], "/local/sub/deep.log");
        let err = b.cp(&CopyOptions::default(), &p).await.unwrap_err();
        assert!(matches!(err, VfsError::DestinationNotDirectory(_)));

        let p = plan(&b, &["/local/*.txt"], "/local/sub");
        let out = b.cp(&CopyOptions::default(), &p).await.unwrap();
        assert_eq!(out.copied.len(), 2);
        assert!(dir.path().join("sub/notes.txt").exists());

        let p = plan(&b, &["/local/notes.txt"], "/local/renamed.txt");
        b.cp(&CopyOptions::default(), &p).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("renamed.txt")).unwrap(), b"alpha\nbeta\n");
    }

    #[tokio::test]
    async fn test_cp_directory_needs_recursive() {
        let (b, dir) = setup();
        let p = plan(&b, &["/local/sub"], "/local/copy/");
        assert!(matches!(
            b.cp(&CopyOptions::default(), &p).await,
            Err(VfsError::IsADirectory(_))
        ));
        let opts = CopyOptions {
            recursive: true,
            ..Default::default()
        };
        b.cp(&opts, &p).await.unwrap();
        assert!(dir.path().join("copy/sub/deep.log").exists());
    }

    #[tokio::test]
    async fn test_rm_and_rmdir() {
        let (b, dir) = setup();
        assert!(matches!(b.rmdir("/local/sub").await, Err(VfsError::DirectoryNotEmpty(_))));
        assert!(matches!(b.rm("/local/sub", false).await, Err(VfsError::IsADirectory(_))));
        assert!(b.rm("/local/*.txt", false).await.unwrap());
        assert!(!dir.path().join("notes.txt").exists());
        assert!(b.rm("/local/sub", true).await.unwrap());
        assert!(!dir.path().join("sub").exists());
        assert!(b.rm("/local/ghost", false).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_grep_and_gzip_round_trip() {
        let (b, dir) = setup();
        let count = GrepOptions {
            count_only: true,
            ..Default::default()
        };
        let result = b.grep(&count, "a$", &["/local/*.txt".into()]).await.unwrap();
        assert_eq!(result, GrepResult::Count(3));

        let out = b.gzip(&CompressOptions::default(), &["/local/notes.txt".into()]).await.unwrap();
        assert_eq!(out.outputs, vec!["/local/notes.txt.gz"]);
        assert!(!dir.path().join("notes.txt").exists());

        b.gunzip(&CompressOptions::default(), &["/local/notes.txt.gz".into()])
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"alpha\nbeta\n");

        let par = CompressOptions {
            parallel: Some(ParallelOptions::default()),
        };
        let err = b.gzip(&par, &["/local/todo.txt".into()]).await.unwrap_err();
        assert!(matches!(err, VfsError::Unsupported(_)));
    }
}
