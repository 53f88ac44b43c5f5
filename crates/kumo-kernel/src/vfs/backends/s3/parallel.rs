//! Offloading heavy operations to the data-parallel job provider.

use std::collections::BTreeMap;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::jobs::{
    ENV_INPUTS, ENV_MOUNT, ENV_SPEC, JobProvider, TaskConfig, WorkerRecord, WorkerSpec,
    parse_records,
};
use crate::vfs::{ParallelOptions, VfsError, VfsResult};

/// Split `items` into at most `n` contiguous, near-equal chunks.
pub(super) fn partition<T: Clone>(items: &[T], n: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let n = n.clamp(1, items.len());
    let base = items.len() / n;
    let extra = items.len() % n;
    let mut out = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let len = base + usize::from(i < extra);
        out.push(items[start..start + len].to_vec());
        start += len;
    }
    out
}

/// Result of one offloaded job.
pub(super) struct JobOutput {
    pub job_id: String,
    /// Empty unless logs were collected.
    pub records: Vec<WorkerRecord>,
}

/// One job: run, wait, and optionally read every task's log.
pub(super) struct Offload<'a> {
    pub jobs: &'a dyn JobProvider,
    pub default_image: &'a str,
    pub mount: &'a str,
}

impl Offload<'_> {
    /// `inputs` are `bucket/key` strings relative to the mount.
    pub async fn run(
        &self,
        par: &ParallelOptions,
        spec: &WorkerSpec,
        inputs: &[String],
        collect_logs: bool,
    ) -> VfsResult<JobOutput> {
        let tasks = partition(inputs, par.task_count());
        let encode = |what: &str, r: serde_json::Result<String>| {
            r.map_err(|e| VfsError::other(format!("failed to encode {what}: {e}")))
        };
        let mut env = BTreeMap::new();
        env.insert(ENV_SPEC.to_string(), encode("worker spec", serde_json::to_string(spec))?);
        env.insert(ENV_INPUTS.to_string(), encode("task inputs", serde_json::to_string(&tasks))?);
        env.insert(ENV_MOUNT.to_string(), self.mount.to_string());

        let config = TaskConfig {
            tasks: tasks.len(),
            memory: par.memory().to_string(),
            cpu: par.cpu().to_string(),
        };
        let image = par.image.as_deref().unwrap_or(self.default_image);

        let job_id = self.jobs.run(image, &config, &env).await?;
        info!(job = %job_id, image, tasks = config.tasks, inputs = inputs.len(), "offloaded job started");
        self.jobs.wait(&job_id, config.tasks).await?;

        let records = if collect_logs {
            let logs = try_join_all((0..config.tasks).map(|i| self.jobs.logs(&job_id, i))).await?;
            logs.iter().flat_map(|log| parse_records(log)).collect()
        } else {
            Vec::new()
        };
        debug!(job = %job_id, records = records.len(), "offloaded job finished");
        Ok(JobOutput { job_id, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_balanced_and_contiguous() {
        let items: Vec<u32> = (0..7).collect();
        let parts = partition(&items, 3);
        assert_eq!(parts, vec![vec![0, 1, 2], vec![3, 4], vec![5, 6]]);
    }

    #[test]
    fn test_partition_caps_at_item_count() {
        let items = vec!["a", "b"];
        assert_eq!(partition(&items, 20).len(), 2);
        assert!(partition::<u8>(&[], 20).is_empty());
        assert_eq!(partition(&items, 0), vec![vec!["a", "b"]]);
    }
}
