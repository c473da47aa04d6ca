use crate::collaborators::{CommandRunner, InvocationResult, Invoker, PlanUpdate, Reviewer, ReviewContext, Updater};
use crate::config::TaskExecutorConfig;
use crate::loc_tracker::LocTrackerHook;
use orc_classify::ErrorClassifier;
use orc_errors::{OrcError, TimeoutError};
use orc_learning::LearningHooks;
use orc_locks::FileLockManager;
use orc_types::{DocumentationTarget, ReviewResult, Status, Task, TaskResult, TaskType};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Named phase a task is in, surfaced in `tracing` spans and useful
/// for unit-testing each transition in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Invoking,
    RunningTestCommands,
    VerifyingDocs,
    Reviewing,
    Retrying,
    Completed,
    Failed,
    UpdatingPlan,
}

/// Outcome of a single declared test command, kept around (rather than
/// discarded after the pass/fail check) so the reviewer can see what
/// already ran.
#[derive(Debug, Clone)]
struct TestCommandRecord {
    command: String,
    passed: bool,
    output: String,
}

/// Outcome of checking one documentation target against the files on
/// disk.
#[derive(Debug, Clone)]
struct DocTargetResult {
    target: DocumentationTarget,
    found: bool,
    line: Option<usize>,
    snippet: Option<String>,
    error: Option<String>,
}

/// Drives a single task through invocation, test commands, doc
/// verification, QC review, and retry/completion, then records the
/// outcome with the learning store and plan updater.
pub struct TaskExecutor {
    config: TaskExecutorConfig,
    invoker: Arc<dyn Invoker>,
    reviewer: Arc<dyn Reviewer>,
    updater: Arc<dyn Updater>,
    command_runner: Arc<dyn CommandRunner>,
    classifier: Arc<ErrorClassifier>,
    learning: Arc<LearningHooks>,
    loc_tracker: Arc<dyn LocTrackerHook>,
    file_locks: Arc<FileLockManager>,
}

/// Dependencies a [`TaskExecutor`] needs; grouped into one struct since
/// the executor's constructor otherwise takes seven `Arc`s with no
/// natural subgrouping.
pub struct TaskExecutorDeps {
    /// Agent invocation collaborator.
    pub invoker: Arc<dyn Invoker>,
    /// QC review collaborator.
    pub reviewer: Arc<dyn Reviewer>,
    /// Plan-file mutation collaborator.
    pub updater: Arc<dyn Updater>,
    /// Shell command collaborator, for test commands.
    pub command_runner: Arc<dyn CommandRunner>,
    /// Error-pattern classifier.
    pub classifier: Arc<ErrorClassifier>,
    /// Pre/post-task learning hooks.
    pub learning: Arc<LearningHooks>,
    /// LOC tracking hook.
    pub loc_tracker: Arc<dyn LocTrackerHook>,
    /// File lock manager, shared across concurrently executing tasks.
    pub file_locks: Arc<FileLockManager>,
}

impl TaskExecutor {
    /// Build a task executor from its collaborators and config.
    #[must_use]
    pub fn new(config: TaskExecutorConfig, deps: TaskExecutorDeps) -> Self {
        Self {
            config,
            invoker: deps.invoker,
            reviewer: deps.reviewer,
            updater: deps.updater,
            command_runner: deps.command_runner,
            classifier: deps.classifier,
            learning: deps.learning,
            loc_tracker: deps.loc_tracker,
            file_locks: deps.file_locks,
        }
    }

    /// Execute `task` to completion: invoke, run test commands, verify
    /// documentation targets, submit to QC review, retry on `Red` up
    /// to the configured budget, then record learning history and push
    /// the final result to the plan updater.
    ///
    /// `dependencies` carries the already-completed tasks `task`
    /// declares in `depends_on`, used to enrich the prompt of
    /// [`TaskType::Integration`] tasks with what they are integrating.
    #[instrument(skip(self, task, dependencies, cancel), fields(task = %task.number))]
    pub async fn execute(
        &self,
        plan_file: &str,
        run_number: u32,
        task: &mut Task,
        dependencies: &[Task],
        cancel: &CancellationToken,
    ) -> Result<TaskResult, OrcError> {
        let mut file_guards = Vec::new();
        let mut sorted_files = task.files.clone();
        sorted_files.sort();
        sorted_files.dedup();
        for path in &sorted_files {
            file_guards.push(self.file_locks.acquire(path).await);
        }

        self.apply_default_agent(task);

        if task.task_type == TaskType::Integration && !dependencies.is_empty() {
            task.prompt.push_str(&Self::integration_context_block(dependencies));
        }

        if let Err(error) = self.learning.pre_task(plan_file, task, self.config.auto_adapt_agent).await {
            warn!(%error, "learning pre-task hook failed; proceeding with unadapted prompt");
        }
        self.apply_default_agent(task);

        let baseline = self.loc_tracker.pre_task(task).await.unwrap_or_default();
        self.updater.update_plan(task, PlanUpdate::InProgress).await?;
        let started = Instant::now();

        let mut last_output = String::new();
        let mut last_feedback: Option<String> = None;
        let mut retry_count = 0u32;
        let mut final_status = Status::Failed;

        'attempts: for attempt in 0..=self.config.max_retries {
            retry_count = attempt;

            let invocation = match self.run_invocation(task, cancel).await {
                Ok(invocation) => invocation,
                Err(error) => {
                    warn!(state = ?TaskState::Invoking, %error, "invocation failed");
                    last_feedback = Some(format!("invocation failed: {error}"));
                    continue 'attempts;
                }
            };
            last_output = effective_output(&invocation.output);

            let (test_records, test_feedback) = if self.config.enforce_test_commands {
                self.run_test_commands(task, cancel).await
            } else {
                (Vec::new(), None)
            };
            if let Some(feedback) = test_feedback {
                info!(state = ?TaskState::RunningTestCommands, "test commands failed, retrying");
                last_feedback = Some(feedback.clone());
                self.append_retry_feedback(task, &feedback, &last_output).await;
                continue 'attempts;
            }

            let (doc_results, doc_feedback) = Self::verify_documentation(task).await;
            if let Some(feedback) = doc_feedback {
                info!(state = ?TaskState::VerifyingDocs, "documentation targets not satisfied, retrying");
                last_feedback = Some(feedback.clone());
                task.prompt.push_str(&format!("\n\nPrevious attempt feedback: {feedback}"));
                continue 'attempts;
            }

            let context = ReviewContext {
                test_command_results: format_test_results(&test_records),
                documentation_verification: format_doc_verification(&doc_results),
            };

            let state = TaskState::Reviewing;
            let review = self.run_review(task, &invocation, &context, cancel).await?;
            last_feedback = Some(review.feedback.clone());

            if review.is_terminal_success() {
                final_status = review.flag;
                info!(?state, status = ?final_status, "task completed");
                break 'attempts;
            }

            if self.config.qc_enabled && !self.reviewer.should_retry(&review, attempt) {
                final_status = Status::Failed;
                info!(state = ?TaskState::Failed, "reviewer vetoed further retries");
                break 'attempts;
            }

            let _retrying = TaskState::Retrying;
            self.append_retry_feedback(task, &review.feedback, &last_output).await;
        }

        if final_status == Status::Failed {
            warn!(state = ?TaskState::Failed, "task exhausted retries without approval");
        }

        let delta = self.loc_tracker.post_task(task, &baseline).await.unwrap_or_default();
        task.record_line_delta(delta.lines_added, delta.lines_deleted);

        let result = TaskResult {
            task_number: task.number.clone(),
            status: final_status,
            output: last_output,
            error: if final_status == Status::Failed {
                last_feedback.clone()
            } else {
                None
            },
            duration: started.elapsed(),
            retry_count,
            review_feedback: last_feedback,
        };

        if let Err(error) = self.learning.post_task(plan_file, run_number, task, &result).await {
            warn!(%error, "learning post-task hook failed");
        }

        let _updating = TaskState::UpdatingPlan;
        self.updater.update_plan(task, PlanUpdate::Terminal(&result)).await?;

        drop(file_guards);
        Ok(result)
    }

    /// Apply `config.default_agent` when `task.agent` is unset. Called
    /// both before and after the learning pre-task hook, since that
    /// hook may run without having adapted the agent either.
    fn apply_default_agent(&self, task: &mut Task) {
        if task.agent.is_none() {
            if let Some(agent) = &self.config.default_agent {
                task.agent = Some(agent.clone());
            }
        }
    }

    /// Build the prompt block appended to an [`TaskType::Integration`]
    /// task, summarizing the dependencies it integrates.
    fn integration_context_block(dependencies: &[Task]) -> String {
        let mut block = String::from("\n\nINTEGRATION TASK CONTEXT:\nThis task builds on the following completed tasks:\n");
        for dep in dependencies {
            block.push_str(&format!(
                "- {} ({}): touched {} file(s), +{}/-{} lines\n",
                dep.number,
                dep.name,
                dep.files.len(),
                dep.lines_added,
                dep.lines_deleted
            ));
        }
        block
    }

    /// Append a retry note to `task.prompt`, including a classifier
    /// suggestion when error-pattern detection is enabled and the
    /// classifier recognizes `output`.
    async fn append_retry_feedback(&self, task: &mut Task, feedback: &str, output: &str) {
        let suggestion = if self.config.enable_error_pattern_detection {
            self.suggest_from_output(output).await
        } else {
            None
        };
        match suggestion {
            Some(suggestion) => {
                task.prompt
                    .push_str(&format!("\n\nPrevious attempt feedback: {feedback}\nSuggestion: {suggestion}"));
            }
            None => {
                task.prompt.push_str(&format!("\n\nPrevious attempt feedback: {feedback}"));
            }
        }
    }

    async fn run_invocation(&self, task: &Task, cancel: &CancellationToken) -> Result<InvocationResult, OrcError> {
        with_timeout(
            self.config.invoke_timeout,
            "invocation",
            task.number.as_str(),
            self.invoker.invoke(task, cancel),
        )
        .await
    }

    /// Run every declared test command in order, stopping at the first
    /// failure. Returns every record produced (including the ones that
    /// passed before a later one failed) alongside retry feedback, when
    /// any command failed or errored.
    async fn run_test_commands(&self, task: &Task, cancel: &CancellationToken) -> (Vec<TestCommandRecord>, Option<String>) {
        let mut records = Vec::new();
        for command in &task.test_commands {
            let outcome = with_timeout(
                self.config.test_command_timeout,
                "test-commands",
                task.number.as_str(),
                self.command_runner.run(command, cancel),
            )
            .await;

            match outcome {
                Ok(output) if output.success() => {
                    records.push(TestCommandRecord {
                        command: command.clone(),
                        passed: true,
                        output: output.combined_output(),
                    });
                }
                Ok(output) => {
                    let combined = output.combined_output();
                    records.push(TestCommandRecord {
                        command: command.clone(),
                        passed: false,
                        output: combined.clone(),
                    });
                    let feedback = format!("test command `{command}` failed:\n{combined}");
                    return (records, Some(feedback));
                }
                Err(error) => {
                    records.push(TestCommandRecord {
                        command: command.clone(),
                        passed: false,
                        output: error.to_string(),
                    });
                    let feedback = format!("test command `{command}` errored: {error}");
                    return (records, Some(feedback));
                }
            }
        }
        (records, None)
    }

    /// Check every declared documentation target by reading
    /// `target.location` from disk and searching its contents for
    /// `target.section`. A target whose file can't be read counts as
    /// not found rather than erroring the task outright.
    async fn verify_documentation(task: &Task) -> (Vec<DocTargetResult>, Option<String>) {
        if task.documentation_targets.is_empty() {
            return (Vec::new(), None);
        }

        let mut results = Vec::new();
        for target in &task.documentation_targets {
            let result = match tokio::fs::read_to_string(&target.location).await {
                Ok(contents) => match locate_section(&contents, &target.section) {
                    Some((line, snippet)) => DocTargetResult {
                        target: target.clone(),
                        found: true,
                        line: Some(line),
                        snippet: Some(snippet),
                        error: None,
                    },
                    None => DocTargetResult {
                        target: target.clone(),
                        found: false,
                        line: None,
                        snippet: None,
                        error: None,
                    },
                },
                Err(error) => DocTargetResult {
                    target: target.clone(),
                    found: false,
                    line: None,
                    snippet: None,
                    error: Some(error.to_string()),
                },
            };
            results.push(result);
        }

        let missing: Vec<String> = results
            .iter()
            .filter(|result| !result.found)
            .map(|result| format!("{} ({})", result.target.location.display(), result.target.section))
            .collect();

        let feedback = if missing.is_empty() {
            None
        } else {
            Some(format!("documentation targets not satisfied: {}", missing.join(", ")))
        };
        (results, feedback)
    }

    async fn run_review(
        &self,
        task: &Task,
        invocation: &InvocationResult,
        context: &ReviewContext,
        cancel: &CancellationToken,
    ) -> Result<ReviewResult, OrcError> {
        if !self.config.qc_enabled {
            return Ok(if invocation.succeeded() {
                ReviewResult::new(Status::Green, "qc disabled; invocation reported success")
            } else {
                ReviewResult::new(
                    Status::Red,
                    format!("qc disabled; invocation exited with code {}", invocation.exit_code),
                )
            });
        }

        with_timeout(
            self.config.review_timeout,
            "review",
            task.number.as_str(),
            self.reviewer.review(task, invocation, context, cancel),
        )
        .await
    }

    async fn suggest_from_output(&self, output: &str) -> Option<String> {
        self.classifier.classify(output).await.map(|detected| detected.pattern.suggestion)
    }
}

/// Find `section` as a substring of one of `contents`' lines, returning
/// its 1-based line number and a snippet of that line plus up to three
/// following lines.
fn locate_section(contents: &str, section: &str) -> Option<(usize, String)> {
    let lines: Vec<&str> = contents.lines().collect();
    let index = lines.iter().position(|line| line.contains(section))?;
    let snippet = lines[index..(index + 4).min(lines.len())].join("\n");
    Some((index + 1, snippet))
}

/// Render a QC-facing `<test_command_results>` block, or `None` when no
/// commands were declared.
fn format_test_results(records: &[TestCommandRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    let passed = records.iter().filter(|record| record.passed).count();
    let mut block = String::from("<test_command_results>\n");
    for record in records {
        let status = if record.passed { "passed" } else { "failed" };
        block.push_str(&format!("<command status=\"{status}\">{}\n", record.command));
        if !record.passed {
            block.push_str(&format!("<output>{}</output>\n", record.output));
        }
        block.push_str("</command>\n");
    }
    block.push_str(&format!("<summary>{passed}/{} commands passed</summary>\n", records.len()));
    block.push_str("</test_command_results>");
    Some(block)
}

/// Render a QC-facing `<documentation_verification>` block, or `None`
/// when no documentation targets were declared.
fn format_doc_verification(results: &[DocTargetResult]) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    let verified = results.iter().filter(|result| result.found).count();
    let mut block = String::from("<documentation_verification>\n");
    for result in results {
        let status = if result.found { "verified" } else { "missing" };
        block.push_str(&format!(
            "<target status=\"{status}\" file=\"{}\" section=\"{}\">\n",
            result.target.location.display(),
            result.target.section
        ));
        if let (Some(line), Some(snippet)) = (result.line, &result.snippet) {
            block.push_str(&format!("<content line=\"{line}\">\n{snippet}\n</content>\n"));
        }
        if let Some(error) = &result.error {
            block.push_str(&format!("<error>{error}</error>\n"));
        }
        block.push_str("</target>\n");
    }
    block.push_str(&format!("<summary>{verified}/{} targets verified</summary>\n", results.len()));
    block.push_str("</documentation_verification>");
    Some(block)
}

/// Extract the payload an agent actually meant to report: a JSON
/// object's `content` field when present, its `error` field as a
/// fallback, otherwise the raw string untouched.
fn effective_output(raw: &str) -> String {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) else {
        return raw.to_string();
    };
    if let Some(content) = map.get("content").and_then(|value| value.as_str()) {
        return content.to_string();
    }
    if let Some(error) = map.get("error").and_then(|value| value.as_str()) {
        if !error.is_empty() {
            return error.to_string();
        }
    }
    raw.to_string()
}

async fn with_timeout<F, T>(duration: Duration, context: &str, task_name: &str, fut: F) -> Result<T, OrcError>
where
    F: Future<Output = Result<T, OrcError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(OrcError::Timeout(TimeoutError::new(task_name, duration, context))),
    }
}
