//! Data-parallel job capability.
//!
//! Heavy object-storage operations can be fanned out to a batch job provider:
//! the caller partitions its inputs into tasks, starts one job, waits for it,
//! and optionally reads each task's log. Workers report results by printing
//! sentinel-prefixed JSON records; everything else in a log is ignored.
//!
//! [`InlineJobs`] runs the worker side in-process against the mounted
//! object stores, so offloading works without an external scheduler.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::{ObjectStore, PutOptions};
use crate::vfs::backends::content::{
    build_matcher, gunzip_bytes, gzip_bytes, matching_lines, strip_gz,
};
use crate::vfs::{VfsError, VfsResult};

/// Prefix marking a worker log line as a result record.
pub const LOG_SENTINEL: &str = "@@kumo@@ ";

/// Environment variable carrying the [`WorkerSpec`] as JSON.
pub const ENV_SPEC: &str = "KUMO_WORKER_SPEC";
/// Environment variable carrying per-task inputs: a JSON array (one entry
/// per task index) of `bucket/key` arrays.
pub const ENV_INPUTS: &str = "KUMO_TASK_INPUTS";
/// Environment variable naming the mount the inputs belong to.
pub const ENV_MOUNT: &str = "KUMO_MOUNT";

/// Resources for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub tasks: usize,
    pub memory: String,
    pub cpu: String,
}

/// What every task of a job does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerSpec {
    Grep { pattern: String, ignore_case: bool },
    Gzip,
    Gunzip,
}

/// One result record emitted by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRecord {
    /// Matching lines of one input.
    Matches { path: String, lines: Vec<String> },
    /// An output object was written.
    Output { path: String },
    /// An input could not be processed.
    Failed { path: String, message: String },
}

impl WorkerRecord {
    /// Render as a sentinel-prefixed log line.
    pub fn to_log_line(&self) -> String {
        format!(
            "{LOG_SENTINEL}{}",
            serde_json::to_string(self).unwrap_or_default()
        )
    }
}

/// Extract result records from a task log.
///
/// Lines without the sentinel are worker noise. Malformed records are
/// skipped with a warning.
pub fn parse_records(log: &str) -> Vec<WorkerRecord> {
    log.lines()
        .filter_map(|line| line.strip_prefix(LOG_SENTINEL))
        .filter_map(|json| match serde_json::from_str(json) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "skipping malformed worker record");
                None
            }
        })
        .collect()
}

/// Batch compute provider.
#[async_trait]
pub trait JobProvider: Send + Sync {
    /// Start a job with `task.tasks` indexed tasks. Returns the job id.
    async fn run(
        &self,
        image: &str,
        task: &TaskConfig,
        env: &BTreeMap<String, String>,
    ) -> VfsResult<String>;

    /// Block until all `task_count` tasks finished.
    async fn wait(&self, job_id: &str, task_count: usize) -> VfsResult<()>;

    /// Full log of one task.
    async fn logs(&self, job_id: &str, task_index: usize) -> VfsResult<String>;
}

// ============================================================================
// In-process provider
// ============================================================================

/// Finished jobs kept for log reads when callers never collect them.
const FINISHED_RETAINED: usize = 32;

enum JobState {
    Running(Vec<JoinHandle<String>>),
    /// A log is taken by its first read.
    Finished(Vec<Option<String>>),
}

#[derive(Default)]
struct JobTable {
    states: HashMap<String, JobState>,
    /// Finished job ids, oldest first.
    finished: VecDeque<String>,
}

impl JobTable {
    fn finish(&mut self, job_id: &str, logs: Vec<String>) {
        self.states.insert(
            job_id.to_string(),
            JobState::Finished(logs.into_iter().map(Some).collect()),
        );
        self.finished.push_back(job_id.to_string());
        while self.finished.len() > FINISHED_RETAINED {
            if let Some(old) = self.finished.pop_front() {
                debug!(job = %old, "dropping unread job logs");
                self.states.remove(&old);
            }
        }
    }

    fn forget(&mut self, job_id: &str) {
        self.states.remove(job_id);
        self.finished.retain(|id| id != job_id);
    }
}

/// Runs worker tasks on the local tokio runtime.
pub struct InlineJobs {
    stores: BTreeMap<String, Arc<dyn ObjectStore>>,
    jobs: Mutex<JobTable>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for InlineJobs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineJobs")
            .field("mounts", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl InlineJobs {
    /// `stores` maps mount paths to the clients their workers read.
    pub fn new(stores: BTreeMap<String, Arc<dyn ObjectStore>>) -> Self {
        Self {
            stores,
            jobs: Mutex::new(JobTable::default()),
            next_id: AtomicU64::new(1),
        }
    }
}

fn env_json<T: for<'de> Deserialize<'de>>(env: &BTreeMap<String, String>, key: &str) -> VfsResult<T> {
    let raw = env
        .get(key)
        .ok_or_else(|| VfsError::other(format!("job environment lacks {key}")))?;
    serde_json::from_str(raw).map_err(|e| VfsError::other(format!("bad {key}: {e}")))
}

#[async_trait]
impl JobProvider for InlineJobs {
    async fn run(
        &self,
        image: &str,
        task: &TaskConfig,
        env: &BTreeMap<String, String>,
    ) -> VfsResult<String> {
        let spec: WorkerSpec = env_json(env, ENV_SPEC)?;
        let inputs: Vec<Vec<String>> = env_json(env, ENV_INPUTS)?;
        let mount = env
            .get(ENV_MOUNT)
            .ok_or_else(|| VfsError::other(format!("job environment lacks {ENV_MOUNT}")))?;
        let store = self
            .stores
            .get(mount)
            .cloned()
            .ok_or_else(|| VfsError::no_mount_point(mount.clone()))?;

        let job_id = format!("inline-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(job = %job_id, image, tasks = inputs.len(), memory = %task.memory, cpu = %task.cpu, "starting inline job");

        let handles = inputs
            .into_iter()
            .map(|keys| {
                let store = Arc::clone(&store);
                let spec = spec.clone();
                let mount = mount.clone();
                tokio::spawn(async move { run_task(store.as_ref(), &mount, &spec, &keys).await })
            })
            .collect();
        self.jobs
            .lock()
            .states
            .insert(job_id.clone(), JobState::Running(handles));
        Ok(job_id)
    }

    async fn wait(&self, job_id: &str, task_count: usize) -> VfsResult<()> {
        let state = self
            .jobs
            .lock()
            .states
            .remove(job_id)
            .ok_or_else(|| VfsError::not_found(format!("job {job_id}")))?;
        let logs = match state {
            JobState::Finished(logs) => logs.into_iter().flatten().collect(),
            JobState::Running(handles) => {
                let mut logs = Vec::with_capacity(handles.len());
                for handle in handles {
                    logs.push(
                        handle
                            .await
                            .map_err(|e| VfsError::upstream(format!("task panicked: {e}"), None))?,
                    );
                }
                logs
            }
        };
        if logs.len() != task_count {
            warn!(job = %job_id, expected = task_count, actual = logs.len(), "task count mismatch");
        }
        self.jobs.lock().finish(job_id, logs);
        Ok(())
    }

    async fn logs(&self, job_id: &str, task_index: usize) -> VfsResult<String> {
        let mut table = self.jobs.lock();
        let (log, drained) = match table.states.get_mut(job_id) {
            Some(JobState::Finished(logs)) => {
                let log = logs
                    .get_mut(task_index)
                    .and_then(Option::take)
                    .ok_or_else(|| VfsError::not_found(format!("job {job_id} task {task_index}")))?;
                (log, logs.iter().all(Option::is_none))
            }
            Some(JobState::Running(_)) => {
                return Err(VfsError::other(format!("job {job_id} still running")));
            }
            None => return Err(VfsError::not_found(format!("job {job_id}"))),
        };
        if drained {
            table.forget(job_id);
        }
        Ok(log)
    }
}

/// Worker body: process each `bucket/key` input and log one record per
/// result.
pub async fn run_task(store: &dyn ObjectStore, mount: &str, spec: &WorkerSpec, keys: &[String]) -> String {
    let mut log = String::new();
    let matcher = match spec {
        WorkerSpec::Grep {
            pattern,
            ignore_case,
        } => match build_matcher(pattern, *ignore_case) {
            Ok(re) => Some(re),
            Err(e) => {
                log.push_str(&format!("worker: {e}\n"));
                return log;
            }
        },
        _ => None,
    };

    for input in keys {
        let path = format!("{mount}/{input}");
        let record = match work(store, spec, matcher.as_ref(), input).await {
            Ok(Outcome::Matched(lines)) => WorkerRecord::Matches { path, lines },
            Ok(Outcome::Wrote(output)) => WorkerRecord::Output {
                path: format!("{mount}/{output}"),
            },
            Err(e) => WorkerRecord::Failed {
                path,
                message: e.to_string(),
            },
        };
        log.push_str(&record.to_log_line());
        log.push('\n');
    }
    log
}

enum Outcome {
    Matched(Vec<String>),
    /// `bucket/key` of the written object.
    Wrote(String),
}

async fn work(
    store: &dyn ObjectStore,
    spec: &WorkerSpec,
    matcher: Option<&regex::Regex>,
    input: &str,
) -> VfsResult<Outcome> {
    let (bucket, key) = input
        .split_once('/')
        .filter(|(b, k)| !b.is_empty() && !k.is_empty())
        .ok_or_else(|| VfsError::invalid_path(input.to_string()))?;

    let (output, data) = match (spec, matcher) {
        (WorkerSpec::Grep { .. }, Some(re)) => {
            let data = store.get_object(bucket, key).await?;
            return Ok(Outcome::Matched(matching_lines(re, &data)));
        }
        (WorkerSpec::Grep { .. }, None) => return Err(VfsError::other("grep without a matcher")),
        (WorkerSpec::Gzip, _) => {
            let data = store.get_object(bucket, key).await?;
            (format!("{key}.gz"), gzip_bytes(&data)?)
        }
        (WorkerSpec::Gunzip, _) => {
            let stem = strip_gz(key)?.to_string();
            let data = store.get_object(bucket, key).await?;
            (stem, gunzip_bytes(&data)?)
        }
    };
    store
        .put_object(bucket, &output, data, &PutOptions::default())
        .await?;
    store.remove_object(bucket, key).await?;
    Ok(Outcome::Wrote(format!("{bucket}/{output}")))
}
