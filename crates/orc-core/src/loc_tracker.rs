use crate::collaborators::CommandRunner;
use async_trait::async_trait;
use orc_errors::{OrcError, TaskError};
use orc_types::{MetadataValue, Task};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Metadata key the baseline commit is recorded under, for callers
/// that want to inspect it without holding onto the `LocBaseline`
/// returned by `pre_task`.
pub const BASELINE_COMMIT_METADATA_KEY: &str = "loc_baseline_commit";

/// State captured before a task runs, handed back to `post_task` so it
/// can compute the task's line delta.
#[derive(Debug, Clone, Default)]
pub struct LocBaseline {
    /// VCS revision at the time the task started, when known.
    pub commit: Option<String>,
}

/// Line delta produced by a task's execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocDelta {
    /// Lines added.
    pub lines_added: u64,
    /// Lines deleted.
    pub lines_deleted: u64,
    /// Number of files touched, including binary files that don't
    /// contribute to `lines_added`/`lines_deleted`.
    pub file_count: usize,
}

/// External collaborator tracking how many lines a task adds or
/// removes, for learning-store bookkeeping and reporting.
#[async_trait]
pub trait LocTrackerHook: Send + Sync {
    /// Capture baseline state before the task's invocation runs,
    /// recording the baseline commit into `task.metadata` under
    /// [`BASELINE_COMMIT_METADATA_KEY`] when one is available.
    async fn pre_task(&self, task: &mut Task) -> Result<LocBaseline, OrcError>;

    /// Compute the task's line delta relative to `baseline`.
    async fn post_task(&self, task: &Task, baseline: &LocBaseline) -> Result<LocDelta, OrcError>;
}

/// Null-object [`LocTrackerHook`] for callers that do not want LOC
/// tracking; always reports a zero delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLocTracker;

#[async_trait]
impl LocTrackerHook for NullLocTracker {
    async fn pre_task(&self, _task: &mut Task) -> Result<LocBaseline, OrcError> {
        Ok(LocBaseline::default())
    }

    async fn post_task(&self, _task: &Task, _baseline: &LocBaseline) -> Result<LocDelta, OrcError> {
        Ok(LocDelta::default())
    }
}

/// [`LocTrackerHook`] backed by `git`, computing the delta via
/// `git diff --numstat <baseline>..HEAD`.
pub struct GitLocTracker {
    runner: Arc<dyn CommandRunner>,
}

impl GitLocTracker {
    /// Build a tracker that shells out to `git` via `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Parse `git diff --numstat` output into a line delta. Binary
    /// rows (reported as `-\t-\t<path>`) count toward `file_count` but
    /// contribute no lines.
    fn parse_numstat(output: &str) -> LocDelta {
        let mut delta = LocDelta::default();
        for line in output.lines() {
            let mut fields = line.split('\t');
            let (Some(added), Some(deleted)) = (fields.next(), fields.next()) else {
                continue;
            };
            delta.file_count += 1;
            if added == "-" || deleted == "-" {
                continue;
            }
            delta.lines_added += added.trim().parse::<u64>().unwrap_or(0);
            delta.lines_deleted += deleted.trim().parse::<u64>().unwrap_or(0);
        }
        delta
    }
}

#[async_trait]
impl LocTrackerHook for GitLocTracker {
    async fn pre_task(&self, task: &mut Task) -> Result<LocBaseline, OrcError> {
        let cancel = CancellationToken::new();
        let output = self.runner.run("git rev-parse HEAD", &cancel).await?;
        if !output.success() {
            warn!(task = %task.number, "git rev-parse failed; LOC tracking disabled for this task");
            return Ok(LocBaseline::default());
        }
        let commit = output.stdout.trim().to_string();
        task.metadata
            .insert(BASELINE_COMMIT_METADATA_KEY.to_string(), MetadataValue::Str(commit.clone()));
        Ok(LocBaseline { commit: Some(commit) })
    }

    async fn post_task(&self, task: &Task, baseline: &LocBaseline) -> Result<LocDelta, OrcError> {
        let Some(commit) = &baseline.commit else {
            return Ok(LocDelta::default());
        };
        let cancel = CancellationToken::new();
        let command = format!("git diff --numstat {commit}..HEAD --");
        let output = self.runner.run(&command, &cancel).await?;
        if !output.success() {
            return Err(OrcError::Task(TaskError::new(
                task.number.to_string(),
                format!("git diff --numstat failed: {}", output.stderr),
            )));
        }
        Ok(Self::parse_numstat(&output.stdout))
    }
}
