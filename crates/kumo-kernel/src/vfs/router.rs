//! Caller-facing VFS facade.
//!
//! Resolves every path through the mount table, fans multi-path operations
//! out per backend, and decides which backend executes a copy.

use std::sync::Arc;

use futures::future::try_join_all;
use kumo_types::{CompressResult, CopyOutcome, DirEntry, FStat, GrepResult};
use tracing::debug;

use super::error::{VfsError, VfsResult};
use super::mount::MountTable;
use super::ops::VfsOps;
use super::types::{CompressOptions, CopyOptions, CopyPlan, CopySource, GrepOptions, LsOptions};
use crate::glob::contains_glob;

/// Paths grouped by owning backend, in first-seen order.
type Groups = Vec<(Arc<dyn VfsOps>, Vec<String>)>;

/// Mount-routed view over every backend.
#[derive(Debug, Clone)]
pub struct Vfs {
    table: Arc<MountTable>,
}

impl Vfs {
    pub fn new(table: MountTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &MountTable {
        &self.table
    }

    /// Backend owning `path`.
    pub fn resolve(&self, path: &str) -> VfsResult<Arc<dyn VfsOps>> {
        self.table.resolve(path)
    }

    fn group(&self, paths: &[String]) -> VfsResult<Groups> {
        let mut groups: Groups = Vec::new();
        for path in paths {
            let backend = self.table.resolve(path)?;
            match groups.iter_mut().find(|(b, _)| Arc::ptr_eq(b, &backend)) {
                Some((_, list)) => list.push(path.clone()),
                None => groups.push((backend, vec![path.clone()])),
            }
        }
        Ok(groups)
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// List paths across backends.
    ///
    /// Mount points below a listed directory appear as directories even when
    /// no backend owns the directory itself.
    pub async fn ls(&self, opts: &LsOptions, paths: &[String]) -> VfsResult<Vec<DirEntry>> {
        let mut routed = Vec::new();
        let mut bridged = Vec::new();
        let mut synthesized: Vec<DirEntry> = Vec::new();

        for path in paths {
            let children = if opts.directory || contains_glob(path) {
                Vec::new()
            } else {
                self.table.synthesize(path)
            };
            match self.table.resolve(path) {
                Ok(_) if children.is_empty() => routed.push(path.clone()),
                Ok(backend) => bridged.push((backend, path.clone())),
                Err(e) if children.is_empty() => return Err(e),
                Err(_) => {}
            }
            synthesized.extend(children);
        }

        let groups = self.group(&routed)?;
        debug!(groups = groups.len(), "ls");
        let listed = try_join_all(groups.iter().map(|(b, ps)| b.ls(opts, ps))).await?;
        let mut entries: Vec<DirEntry> = listed.into_iter().flatten().collect();

        // Directories that only exist because mounts live below them.
        for (backend, path) in bridged {
            match backend.ls(opts, std::slice::from_ref(&path)).await {
                Ok(found) => entries.extend(found),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        for entry in synthesized {
            if !entries.iter().any(|e| e.path == entry.path) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn fstat(
        &self,
        path: &str,
        with_data: bool,
        enoent_ok: bool,
    ) -> VfsResult<Option<FStat>> {
        let backend = match self.table.resolve(path) {
            Ok(b) => b,
            Err(_) if !self.table.synthesize(path).is_empty() => {
                return Ok(Some(FStat::directory(path)));
            }
            Err(e) => return Err(e),
        };
        backend.fstat(path, with_data, enoent_ok).await
    }

    pub async fn fslice(&self, path: &str, offset: u64, length: u64) -> VfsResult<Vec<u8>> {
        self.table.resolve(path)?.fslice(path, offset, length).await
    }

    /// Read a whole file through its backend.
    pub async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        self.table.resolve(path)?.read_all(path).await
    }

    /// Search across backends and merge the per-backend results.
    ///
    /// A backend that found nothing does not fail the search unless every
    /// backend found nothing.
    pub async fn grep(
        &self,
        opts: &GrepOptions,
        pattern: &str,
        paths: &[String],
    ) -> VfsResult<GrepResult> {
        let groups = self.group(paths)?;
        let results = futures::future::join_all(
            groups.iter().map(|(b, ps)| b.grep(opts, pattern, ps)),
        )
        .await;

        let mut merged: Option<GrepResult> = None;
        for result in results {
            match result {
                Ok(r) => {
                    merged = Some(match merged {
                        Some(m) => m.merge(r),
                        None => r,
                    })
                }
                Err(e) if e.is_no_matches() => {}
                Err(e) => return Err(e),
            }
        }

        match merged {
            Some(GrepResult::Matches(m)) if m.iter().all(|f| f.lines.is_empty()) => {
                Err(VfsError::NoMatches(pattern.to_string()))
            }
            Some(r) => Ok(r),
            None => Err(VfsError::NoMatches(pattern.to_string())),
        }
    }

    // ========================================================================
    // Writing
    // ========================================================================

    pub async fn fwrite(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        self.table.resolve(path)?.fwrite(path, data).await
    }

    /// Copy `sources` to `dst`.
    ///
    /// A non-local destination executes the whole copy. Otherwise each
    /// non-local source group executes its own share, and local sources are
    /// handled by the local destination. Groups run concurrently; the first
    /// failure wins.
    ///
    /// When the copy is split across executors the destination must be a
    /// directory: an existing file fails the whole copy before anything is
    /// written, and a missing destination is created as a directory.
    pub async fn cp(
        &self,
        opts: &CopyOptions,
        sources: &[String],
        dst: &str,
    ) -> VfsResult<CopyOutcome> {
        let dst_backend = self.table.resolve(dst)?;
        let groups = self.group(sources)?;

        let mut plans: Vec<(Arc<dyn VfsOps>, CopyPlan)> = Vec::new();
        if !dst_backend.identity().is_local {
            let sources = groups
                .iter()
                .flat_map(|(b, ps)| {
                    ps.iter().map(|p| CopySource {
                        path: p.clone(),
                        is_self: Arc::ptr_eq(b, &dst_backend),
                        backend: Arc::clone(b),
                    })
                })
                .collect();
            plans.push((
                Arc::clone(&dst_backend),
                CopyPlan {
                    sources,
                    dst: dst.to_string(),
                    dst_is_self: true,
                    dst_backend: Arc::clone(&dst_backend),
                },
            ));
        } else {
            for (backend, paths) in groups {
                let executor = if backend.identity().is_local {
                    Arc::clone(&dst_backend)
                } else {
                    Arc::clone(&backend)
                };
                let sources = paths
                    .into_iter()
                    .map(|p| CopySource {
                        path: p,
                        is_self: Arc::ptr_eq(&backend, &executor),
                        backend: Arc::clone(&backend),
                    })
                    .collect();
                let dst_is_self = Arc::ptr_eq(&executor, &dst_backend);
                plans.push((
                    executor,
                    CopyPlan {
                        sources,
                        dst: dst.to_string(),
                        dst_is_self,
                        dst_backend: Arc::clone(&dst_backend),
                    },
                ));
            }
        }

        if plans.len() > 1 && !dst.ends_with('/') {
            if let Some(stat) = dst_backend.fstat(dst, false, true).await?
                && !stat.is_directory
            {
                return Err(VfsError::destination_not_directory(dst));
            }
            let dir = format!("{dst}/");
            for (_, plan) in &mut plans {
                plan.dst.clone_from(&dir);
            }
        }

        debug!(dst, executors = plans.len(), "cp");
        let outcomes = try_join_all(plans.iter().map(|(exec, plan)| exec.cp(opts, plan))).await?;
        Ok(outcomes
            .into_iter()
            .fold(CopyOutcome::default(), CopyOutcome::merge))
    }

    pub async fn rm(&self, path: &str, recursive: bool) -> VfsResult<bool> {
        self.table.resolve(path)?.rm(path, recursive).await
    }

    pub async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.table.resolve(path)?.mkdir(path).await
    }

    pub async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.table.resolve(path)?.rmdir(path).await
    }

    pub async fn gzip(&self, opts: &CompressOptions, paths: &[String]) -> VfsResult<CompressResult> {
        let groups = self.group(paths)?;
        let results = try_join_all(groups.iter().map(|(b, ps)| b.gzip(opts, ps))).await?;
        Ok(results
            .into_iter()
            .fold(CompressResult::default(), CompressResult::merge))
    }

    pub async fn gunzip(
        &self,
        opts: &CompressOptions,
        paths: &[String],
    ) -> VfsResult<CompressResult> {
        let groups = self.group(paths)?;
        let results = try_join_all(groups.iter().map(|(b, ps)| b.gunzip(opts, ps))).await?;
        Ok(results
            .into_iter()
            .fold(CompressResult::default(), CompressResult::merge))
    }
}
