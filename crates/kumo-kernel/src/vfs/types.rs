//! Option payloads and the copy plan passed to backends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::ops::VfsOps;

/// Default number of worker tasks for data-parallel offload.
pub const DEFAULT_PARALLEL_TASKS: usize = 20;
/// Default worker memory request.
pub const DEFAULT_PARALLEL_MEMORY: &str = "1Gi";
/// Default worker cpu request.
pub const DEFAULT_PARALLEL_CPU: &str = "1";

/// Options for `ls`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LsOptions {
    /// List directories themselves rather than their contents (`ls -d`).
    #[serde(default)]
    pub directory: bool,
}

/// Options for `cp`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyOptions {
    /// Mark uploaded objects public-read.
    #[serde(default)]
    pub public_read: bool,
    /// Copy directory trees.
    #[serde(default)]
    pub recursive: bool,
}

/// Request to offload a heavy operation to the data-parallel job provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelOptions {
    /// Number of worker tasks. Defaults to 20.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Worker image override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Collect worker logs and return the records they emitted.
    #[serde(default)]
    pub with_logs: bool,
}

impl ParallelOptions {
    pub fn task_count(&self) -> usize {
        self.tasks.filter(|n| *n > 0).unwrap_or(DEFAULT_PARALLEL_TASKS)
    }

    pub fn memory(&self) -> &str {
        self.memory.as_deref().unwrap_or(DEFAULT_PARALLEL_MEMORY)
    }

    pub fn cpu(&self) -> &str {
        self.cpu.as_deref().unwrap_or(DEFAULT_PARALLEL_CPU)
    }
}

/// Options for `grep`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepOptions {
    /// Reduce to a single match count (`-c`).
    #[serde(default)]
    pub count_only: bool,
    /// Return only the inputs with at least one match (`-l`).
    #[serde(default)]
    pub files_only: bool,
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<ParallelOptions>,
}

/// Options for `gzip` and `gunzip`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<ParallelOptions>,
}

/// One copy source, with the backend that owns it.
#[derive(Clone)]
pub struct CopySource {
    /// Full namespace path.
    pub path: String,
    /// True when the source backend is the backend executing the copy.
    pub is_self: bool,
    pub backend: Arc<dyn VfsOps>,
}

impl std::fmt::Debug for CopySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopySource")
            .field("path", &self.path)
            .field("is_self", &self.is_self)
            .field("backend", &self.backend.identity().mount_path)
            .finish()
    }
}

/// Everything a backend needs to execute a copy.
///
/// Built by the router; backends never resolve paths themselves.
#[derive(Clone)]
pub struct CopyPlan {
    pub sources: Vec<CopySource>,
    /// Full namespace path of the destination.
    pub dst: String,
    /// True when the destination is owned by the executing backend.
    pub dst_is_self: bool,
    pub dst_backend: Arc<dyn VfsOps>,
}

impl CopyPlan {
    /// Sources owned by the executing backend.
    pub fn self_sources(&self) -> impl Iterator<Item = &CopySource> {
        self.sources.iter().filter(|s| s.is_self)
    }

    /// Sources owned by some other backend.
    pub fn foreign_sources(&self) -> impl Iterator<Item = &CopySource> {
        self.sources.iter().filter(|s| !s.is_self)
    }
}

impl std::fmt::Debug for CopyPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyPlan")
            .field("sources", &self.sources)
            .field("dst", &self.dst)
            .field("dst_is_self", &self.dst_is_self)
            .field("dst_backend", &self.dst_backend.identity().mount_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_defaults() {
        let opts = ParallelOptions::default();
        assert_eq!(opts.task_count(), 20);
        assert_eq!(opts.memory(), "1Gi");
        assert_eq!(opts.cpu(), "1");

        let opts = ParallelOptions {
            tasks: Some(0),
            memory: Some("4Gi".into()),
            ..Default::default()
        };
        assert_eq!(opts.task_count(), 20);
        assert_eq!(opts.memory(), "4Gi");
    }

    #[test]
    fn test_grep_options_wire_shape() {
        let json = serde_json::json!({"countOnly": true});
        let opts: GrepOptions = serde_json::from_value(json).unwrap();
        assert!(opts.count_only);
        assert!(!opts.files_only);
        assert!(opts.parallel.is_none());
    }
}
