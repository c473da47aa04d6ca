use async_trait::async_trait;
use orc_errors::OrcError;
use orc_types::{ReviewResult, Status, Task, TaskResult};
use tokio_util::sync::CancellationToken;

/// Output of a single agent invocation against a task.
#[derive(Debug, Clone, Default)]
pub struct InvocationResult {
    /// Combined stdout/stderr produced by the invocation.
    pub output: String,
    /// Process exit code, when the invoker ran a subprocess.
    pub exit_code: i32,
    /// Paths the invocation reports having changed.
    pub files_changed: Vec<String>,
}

impl InvocationResult {
    /// Whether the invocation's own exit code indicates success. Does
    /// not account for test commands or review, which run afterward.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// External collaborator that dispatches a task to an agent. The
/// concrete transport (subprocess, RPC, in-process call) is entirely
/// up to the implementation.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Invoke `task`, honoring `cancel` for cooperative cancellation.
    async fn invoke(&self, task: &Task, cancel: &CancellationToken) -> Result<InvocationResult, OrcError>;
}

/// Formatted test-command and documentation-verification evidence
/// handed to the reviewer alongside a task's invocation output, so QC
/// can see what already ran rather than re-deriving it.
#[derive(Debug, Clone, Default)]
pub struct ReviewContext {
    /// `<test_command_results>` block, when the task declared any test
    /// commands.
    pub test_command_results: Option<String>,
    /// `<documentation_verification>` block, when the task declared any
    /// documentation targets.
    pub documentation_verification: Option<String>,
}

/// External collaborator that runs QC review over a task's
/// invocation output.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Review `task`'s `invocation` output together with `context`,
    /// returning a verdict and feedback.
    async fn review(
        &self,
        task: &Task,
        invocation: &InvocationResult,
        context: &ReviewContext,
        cancel: &CancellationToken,
    ) -> Result<ReviewResult, OrcError>;

    /// Whether a `Red` `review` should be retried at `attempt`. The
    /// default only ever retries a `Red` verdict, leaving the budget
    /// itself to the caller; override to veto a retry the executor
    /// would otherwise attempt (e.g. when the same failure keeps
    /// recurring).
    fn should_retry(&self, review: &ReviewResult, attempt: u32) -> bool {
        let _ = attempt;
        review.flag == Status::Red
    }
}

/// A plan-file mutation an [`Updater`] is asked to apply. Each variant
/// corresponds to one of the task state machine's persisted
/// transitions.
#[derive(Debug, Clone)]
pub enum PlanUpdate<'a> {
    /// Task has started running; written once, before invocation.
    InProgress,
    /// Task reached a terminal state; written once, after review.
    Terminal(&'a TaskResult),
}

/// External collaborator that mutates the plan file to reflect a
/// task's progress. The plan-file mutation primitive itself is out of
/// scope; this trait is the seam the executor calls through.
///
/// Implementations must be idempotent for identical `(task, update)`
/// pairs, since a crashed run may be retried against the same plan.
#[async_trait]
pub trait Updater: Send + Sync {
    /// Apply `update` to `task`'s entry in the plan.
    async fn update_plan(&self, task: &Task, update: PlanUpdate<'_>) -> Result<(), OrcError>;
}

/// Output of a single shell command run by a [`CommandRunner`].
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Process exit code.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited successfully.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined stdout and stderr, for error classification.
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// External collaborator that runs a single shell command (a task's
/// test command, or the LOC tracker's `git` invocations).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`, honoring `cancel` for cooperative cancellation.
    async fn run(&self, command: &str, cancel: &CancellationToken) -> Result<CommandOutput, OrcError>;
}
