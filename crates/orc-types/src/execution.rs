use crate::task::{Task, TaskNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Outcome of a task's QC review, also used as the task's final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Reviewer approved outright.
    Green,
    /// Reviewer approved with reservations; the task completes without
    /// retrying.
    Yellow,
    /// Reviewer rejected; eligible for retry.
    Red,
    /// All retries exhausted without approval.
    Failed,
}

/// Alias kept for review-site call sites that only ever produce
/// `Green`/`Yellow`/`Red`, never `Failed` (that status is assigned by
/// the executor after retries are exhausted, never by a reviewer).
pub type ReviewFlag = Status;

/// Structured result of a single QC review pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Reviewer's verdict.
    pub flag: ReviewFlag,
    /// Free-text feedback, fed back into the retry prompt on `Red`.
    pub feedback: String,
    /// Per-criterion breakdown, when the reviewer reports one.
    pub criteria: Vec<CriterionResult>,
}

impl ReviewResult {
    /// Build a review result with no per-criterion breakdown.
    #[inline]
    #[must_use]
    pub fn new(flag: ReviewFlag, feedback: impl Into<String>) -> Self {
        Self {
            flag,
            feedback: feedback.into(),
            criteria: Vec::new(),
        }
    }

    /// Whether this review allows the task to complete without another
    /// attempt.
    #[inline]
    #[must_use]
    pub fn is_terminal_success(&self) -> bool {
        matches!(self.flag, Status::Green | Status::Yellow)
    }
}

/// A single acceptance criterion's pass/fail outcome within a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionResult {
    /// Criterion name.
    pub name: String,
    /// Whether it passed.
    pub passed: bool,
    /// Optional notes from the reviewer.
    pub notes: Option<String>,
}

/// Result of executing a single task to completion (success or
/// exhaustion of retries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task number this result belongs to.
    pub task_number: TaskNumber,
    /// Final status.
    pub status: Status,
    /// Combined stdout/stderr from the last invocation attempt.
    pub output: String,
    /// Error message, present when `status` is `Red` or `Failed`.
    pub error: Option<String>,
    /// Wall-clock time spent on the task across all attempts.
    pub duration: Duration,
    /// Number of retry attempts performed (0 if it succeeded on the
    /// first try).
    pub retry_count: u32,
    /// Feedback from the final review pass, if any.
    pub review_feedback: Option<String>,
}

impl TaskResult {
    /// Whether the task ultimately succeeded (`Green` or `Yellow`).
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.status, Status::Green | Status::Yellow)
    }
}

/// Aggregate result of executing an entire plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Total number of tasks in the plan.
    pub total_tasks: usize,
    /// Number of tasks that completed (`Green` or `Yellow`).
    pub completed: usize,
    /// Number of tasks that ended `Failed`.
    pub failed: usize,
    /// Task numbers that ended `Failed`.
    pub failed_tasks: Vec<TaskNumber>,
    /// Count of tasks per terminal status.
    pub status_breakdown: HashMap<String, usize>,
    /// Count of tasks handled per agent name.
    pub agent_usage: HashMap<String, usize>,
    /// Sum of lines added across all tasks.
    pub total_lines_added: u64,
    /// Sum of lines deleted across all tasks.
    pub total_lines_deleted: u64,
    /// Wall-clock time for the whole plan.
    pub duration: Duration,
}

impl ExecutionResult {
    /// Build an aggregate result from the individual task results and
    /// the tasks they belong to (needed for agent-usage accounting).
    #[must_use]
    pub fn from_results(results: &[TaskResult], tasks: &BTreeMap<TaskNumber, Task>, duration: Duration) -> Self {
        let total_tasks = results.len();
        let mut completed = 0;
        let mut failed = 0;
        let mut failed_tasks = Vec::new();
        let mut status_breakdown: HashMap<String, usize> = HashMap::new();
        let mut agent_usage: HashMap<String, usize> = HashMap::new();
        let mut total_lines_added = 0u64;
        let mut total_lines_deleted = 0u64;

        for result in results {
            let key = match result.status {
                Status::Green => "green",
                Status::Yellow => "yellow",
                Status::Red => "red",
                Status::Failed => "failed",
            };
            *status_breakdown.entry(key.to_string()).or_insert(0) += 1;

            if result.succeeded() {
                completed += 1;
            }
            if result.status == Status::Failed {
                failed += 1;
                failed_tasks.push(result.task_number.clone());
            }

            if let Some(task) = tasks.get(&result.task_number) {
                if let Some(agent) = &task.agent {
                    *agent_usage.entry(agent.clone()).or_insert(0) += 1;
                }
                total_lines_added += task.lines_added;
                total_lines_deleted += task.lines_deleted;
            }
        }

        Self {
            total_tasks,
            completed,
            failed,
            failed_tasks,
            status_breakdown,
            agent_usage,
            total_lines_added,
            total_lines_deleted,
            duration,
        }
    }

    /// Fraction of tasks that completed, in `[0.0, 1.0]`. Returns `1.0`
    /// for an empty plan.
    #[inline]
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            1.0
        } else {
            self.completed as f64 / self.total_tasks as f64
        }
    }
}

/// Kind of anomaly the anomaly monitor can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyType {
    /// `N` or more tasks in a row ended `Red`/`Failed`.
    ConsecutiveFailures,
    /// The rolling failure rate within a wave crossed its threshold.
    HighErrorRate,
    /// A task's duration was a statistical outlier versus its wave.
    DurationOutlier,
}

/// Severity assigned to a raised anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational; no action implied.
    Low,
    /// Worth surfacing to an operator.
    Medium,
    /// Likely requires intervention.
    High,
}

/// An anomaly detected by the anomaly monitor during wave execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveAnomaly {
    /// Kind of anomaly.
    pub anomaly_type: AnomalyType,
    /// Human-readable description.
    pub description: String,
    /// Assigned severity.
    pub severity: Severity,
    /// The task that triggered the anomaly, when applicable.
    pub task_number: Option<TaskNumber>,
    /// Wave the anomaly was observed in.
    pub wave_name: String,
}

/// Coarse category an error message is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// A defect in the generated code itself.
    CodeLevel,
    /// A defect in the plan (missing dependency, bad task ordering).
    PlanLevel,
    /// An environment or infrastructure problem.
    EnvLevel,
}

/// A named entry in the error classifier's rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Category this pattern maps to.
    pub category: ErrorCategory,
    /// Suggested remediation, shown to an operator or fed back as
    /// review feedback.
    pub suggestion: String,
    /// Whether an agent retry is expected to fix this class of error
    /// unaided.
    pub agent_can_fix: bool,
    /// Whether this class of error should stop automatic retries and
    /// escalate to a human.
    pub requires_human_intervention: bool,
}

/// How an error was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMethod {
    /// Matched a compiled regex rule.
    Regex,
    /// Classified by an external semantic fallback.
    Semantic,
}

/// An error matched against the classifier's rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedError {
    /// The matched pattern.
    pub pattern: ErrorPattern,
    /// How the match was produced.
    pub method: DetectionMethod,
    /// Classifier confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// When the detection occurred.
    pub timestamp: DateTime<Utc>,
    /// The raw output the pattern was matched against.
    pub raw_output: String,
}

/// Coarse failure pattern extracted from a failed task's output for
/// learning purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailurePattern {
    /// Build/compile failure.
    CompilationError,
    /// A test command failed.
    TestFailure,
    /// A required dependency was missing.
    DependencyMissing,
    /// A filesystem or process permission error.
    PermissionError,
    /// The invocation timed out.
    Timeout,
    /// An error with no more specific classification.
    RuntimeError,
}

/// A single recorded task execution, used by the learning store to
/// inform future attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Plan file the execution belongs to.
    pub plan_file: String,
    /// Monotonic run number within that plan file.
    pub run_number: u32,
    /// Task number executed.
    pub task_number: TaskNumber,
    /// Task name at the time of execution.
    pub task_name: String,
    /// Agent used for this attempt.
    pub agent: Option<String>,
    /// Prompt sent for this attempt.
    pub prompt: String,
    /// Whether the attempt ultimately succeeded.
    pub success: bool,
    /// Final QC verdict, if review ran.
    pub qc_verdict: Option<String>,
    /// Wall-clock duration of the attempt, in seconds.
    pub duration_secs: f64,
    /// Lines added.
    pub lines_added: u64,
    /// Lines deleted.
    pub lines_deleted: u64,
    /// Failure patterns extracted from the attempt, empty on success.
    pub failure_patterns: Vec<FailurePattern>,
}

/// Summary of a task's execution history, used to adapt future
/// attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureAnalysis {
    /// Total recorded attempts for the task.
    pub total_attempts: u32,
    /// Number of attempts that failed.
    pub failed_attempts: u32,
    /// Distinct agents that have been tried.
    pub tried_agents: Vec<String>,
    /// Failure patterns seen across attempts, most common first.
    pub common_patterns: Vec<FailurePattern>,
    /// Agent suggested for the next attempt, if the history supports
    /// one.
    pub suggested_agent: Option<String>,
    /// Suggested adjustment to the approach, surfaced as prompt
    /// guidance.
    pub suggested_approach: Option<String>,
    /// Whether the next attempt should switch agents.
    pub should_try_different_agent: bool,
}

impl Default for FailureAnalysis {
    fn default() -> Self {
        Self {
            total_attempts: 0,
            failed_attempts: 0,
            tried_agents: Vec::new(),
            common_patterns: Vec::new(),
            suggested_agent: None,
            suggested_approach: None,
            should_try_different_agent: false,
        }
    }
}
