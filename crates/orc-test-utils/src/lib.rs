//! Testing utilities for the plan execution workspace.
//!
//! Shared scripted collaborator implementations and plan/task fixtures
//! for integration-style tests in `orc-core` and beyond.

#![allow(missing_docs)]

use async_trait::async_trait;
use orc_core::{CommandOutput, CommandRunner, InvocationResult, Invoker, PlanUpdate, Reviewer, ReviewContext, Updater};
use orc_errors::OrcError;
use orc_types::{Plan, ReviewResult, Status, Task, TaskResult, Wave};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Build a minimal single-task, single-wave plan for exercising the
/// orchestrator without a plan-file parser.
pub fn single_task_plan(task_number: &str) -> Plan {
    let task = Task::new(task_number, "fixture task", "do the thing");
    let mut tasks = BTreeMap::new();
    tasks.insert(task.number.clone(), task);
    Plan::new(vec![Wave::new("wave-1").with_task(task_number)], tasks)
}

/// Build a plan with `waves` sequential waves, each containing one
/// task named after its position (`"1"`, `"2"`, ...).
pub fn sequential_plan(wave_count: usize) -> Plan {
    let mut tasks = BTreeMap::new();
    let mut waves = Vec::with_capacity(wave_count);
    for i in 1..=wave_count {
        let number = i.to_string();
        let task = Task::new(number.as_str(), format!("task {i}"), "do the thing");
        tasks.insert(task.number.clone(), task);
        waves.push(Wave::new(format!("wave-{i}")).with_task(number));
    }
    Plan::new(waves, tasks)
}

/// [`Invoker`] that always reports success with no files changed.
#[derive(Debug, Clone, Default)]
pub struct AlwaysSucceedsInvoker;

#[async_trait]
impl Invoker for AlwaysSucceedsInvoker {
    async fn invoke(&self, _task: &Task, _cancel: &CancellationToken) -> Result<InvocationResult, OrcError> {
        Ok(InvocationResult {
            output: "ok".into(),
            exit_code: 0,
            files_changed: Vec::new(),
        })
    }
}

/// [`Reviewer`] that returns a fixed verdict on every call, regardless
/// of the task or invocation it is handed.
pub struct FixedVerdictReviewer {
    pub flag: Status,
    pub feedback: String,
}

impl FixedVerdictReviewer {
    #[must_use]
    pub fn new(flag: Status, feedback: impl Into<String>) -> Self {
        Self {
            flag,
            feedback: feedback.into(),
        }
    }
}

#[async_trait]
impl Reviewer for FixedVerdictReviewer {
    async fn review(
        &self,
        _task: &Task,
        _invocation: &InvocationResult,
        _context: &ReviewContext,
        _cancel: &CancellationToken,
    ) -> Result<ReviewResult, OrcError> {
        Ok(ReviewResult::new(self.flag, self.feedback.clone()))
    }
}

/// [`Reviewer`] that returns successive verdicts from a fixed script,
/// repeating the last entry once exhausted.
pub struct ScriptedReviewer {
    verdicts: Vec<Status>,
    calls: Mutex<usize>,
}

impl ScriptedReviewer {
    #[must_use]
    pub fn new(verdicts: Vec<Status>) -> Self {
        Self {
            verdicts,
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    async fn review(
        &self,
        _task: &Task,
        _invocation: &InvocationResult,
        _context: &ReviewContext,
        _cancel: &CancellationToken,
    ) -> Result<ReviewResult, OrcError> {
        let mut calls = self.calls.lock();
        let index = (*calls).min(self.verdicts.len().saturating_sub(1));
        *calls += 1;
        let flag = self.verdicts.get(index).copied().unwrap_or(Status::Red);
        Ok(ReviewResult::new(flag, format!("scripted verdict #{index}")))
    }
}

/// [`Updater`] recording every terminal result it is handed, for
/// assertions after a test run. In-progress updates are observed but
/// not recorded, since most callers only care about final outcomes.
#[derive(Default)]
pub struct RecordingUpdater {
    pub recorded: Mutex<Vec<TaskResult>>,
}

#[async_trait]
impl Updater for RecordingUpdater {
    async fn update_plan(&self, _task: &Task, update: PlanUpdate<'_>) -> Result<(), OrcError> {
        if let PlanUpdate::Terminal(result) = update {
            self.recorded.lock().push(result.clone());
        }
        Ok(())
    }
}

/// [`CommandRunner`] that always succeeds with empty output.
#[derive(Debug, Clone, Default)]
pub struct AlwaysSucceedsRunner;

#[async_trait]
impl CommandRunner for AlwaysSucceedsRunner {
    async fn run(&self, _command: &str, _cancel: &CancellationToken) -> Result<CommandOutput, OrcError> {
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }
}

/// [`CommandRunner`] that always fails with the given stderr text.
pub struct AlwaysFailsRunner {
    pub stderr: String,
}

impl AlwaysFailsRunner {
    #[must_use]
    pub fn new(stderr: impl Into<String>) -> Self {
        Self { stderr: stderr.into() }
    }
}

#[async_trait]
impl CommandRunner for AlwaysFailsRunner {
    async fn run(&self, _command: &str, _cancel: &CancellationToken) -> Result<CommandOutput, OrcError> {
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: self.stderr.clone(),
            exit_code: 1,
        })
    }
}

/// Convenience constructor for a cancellation token that is never
/// cancelled, for tests that don't exercise cancellation.
#[must_use]
pub fn never_cancelled() -> CancellationToken {
    CancellationToken::new()
}

/// Convenience constructor for an already-cancelled token, for tests
/// exercising cancellation handling.
#[must_use]
pub fn pre_cancelled() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}

#[must_use]
pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
