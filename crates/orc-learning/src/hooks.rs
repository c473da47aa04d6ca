use crate::patterns::extract_failure_patterns;
use crate::store::{LearningError, LearningStore};
use orc_types::{Task, TaskExecution, TaskResult};
use std::sync::Arc;
use tracing::info;

/// Adapts a task's prompt (and, when enabled, its agent) before
/// invocation using its execution history, and records the outcome
/// afterward.
///
/// Prompt adaptation always appends rather than rewrites, and always
/// includes one of the substrings `"past failures"` or `"previous
/// attempts"` when history exists, so callers (and tests) can detect
/// that adaptation happened without parsing the exact wording.
pub struct LearningHooks {
    store: Arc<dyn LearningStore>,
}

impl LearningHooks {
    /// Wrap a learning store with the pre/post-task hooks.
    #[must_use]
    pub fn new(store: Arc<dyn LearningStore>) -> Self {
        Self { store }
    }

    /// Adapt `task` in place based on its prior attempts within
    /// `plan_file`. A no-op when the task has no recorded history.
    ///
    /// When `auto_adapt_agent` is `true` and history recommends
    /// switching agents, `task.agent` is overwritten with the
    /// suggested agent, provided one is available and it actually
    /// differs from the task's current agent.
    pub async fn pre_task(&self, plan_file: &str, task: &mut Task, auto_adapt_agent: bool) -> Result<(), LearningError> {
        let analysis = self.store.analyze_failures(plan_file, &task.number).await?;
        if analysis.total_attempts == 0 {
            return Ok(());
        }

        let mut note = format!(
            "\n\nNote: this task has {} previous attempts ({} failed).",
            analysis.total_attempts, analysis.failed_attempts
        );
        if let Some(approach) = &analysis.suggested_approach {
            note.push_str(&format!(" Based on past failures, {approach}."));
        }
        task.prompt.push_str(&note);

        if analysis.should_try_different_agent {
            if let Some(suggested) = &analysis.suggested_agent {
                if auto_adapt_agent && Some(suggested) != task.agent.as_ref() {
                    info!(
                        task = %task.number,
                        from = task.agent.as_deref().unwrap_or("unset"),
                        to = %suggested,
                        "learning history suggests switching agents; applying suggestion"
                    );
                    task.agent = Some(suggested.clone());
                } else if !auto_adapt_agent {
                    info!(
                        task = %task.number,
                        current_agent = task.agent.as_deref().unwrap_or("unset"),
                        suggested = %suggested,
                        "learning history suggests switching agents; auto-adapt disabled, leaving as-is"
                    );
                }
            }
        }

        Ok(())
    }

    /// Record a completed task's outcome for future `pre_task` calls
    /// and for the run's session aggregates.
    pub async fn post_task(
        &self,
        plan_file: &str,
        run_number: u32,
        task: &Task,
        result: &TaskResult,
    ) -> Result<(), LearningError> {
        let failure_patterns = if result.succeeded() {
            Vec::new()
        } else {
            extract_failure_patterns(&result.output, result.review_feedback.as_deref())
        };

        let execution = TaskExecution {
            plan_file: plan_file.to_string(),
            run_number,
            task_number: task.number.clone(),
            task_name: task.name.clone(),
            agent: task.agent.clone(),
            prompt: task.prompt.clone(),
            success: result.succeeded(),
            qc_verdict: Some(format!("{:?}", result.status)),
            duration_secs: result.duration.as_secs_f64(),
            lines_added: task.lines_added,
            lines_deleted: task.lines_deleted,
            failure_patterns,
        };

        self.store.record_execution(execution).await?;
        self.store.upsert_session(plan_file, run_number).await?;
        self.store.record_session_metrics(plan_file, run_number, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLearningStore;
    use orc_types::{Status, TaskNumber};
    use std::time::Duration;

    fn failed_result(task_number: &str) -> TaskResult {
        TaskResult {
            task_number: TaskNumber::new(task_number),
            status: Status::Red,
            output: "error[E0308]: mismatched types".into(),
            error: Some("compile error".into()),
            duration: Duration::from_secs(2),
            retry_count: 0,
            review_feedback: Some("fix the type mismatch".into()),
        }
    }

    #[tokio::test]
    async fn pre_task_is_noop_without_history() {
        let store = Arc::new(InMemoryLearningStore::new());
        let hooks = LearningHooks::new(store);
        let mut task = Task::new("1", "n", "do the thing");
        let original_prompt = task.prompt.clone();
        hooks.pre_task("plan.yaml", &mut task, true).await.unwrap();
        assert_eq!(task.prompt, original_prompt);
    }

    #[tokio::test]
    async fn post_then_pre_task_adapts_prompt() {
        let store = Arc::new(InMemoryLearningStore::new());
        let hooks = LearningHooks::new(store);

        let mut task = Task::new("1", "n", "do the thing");
        hooks
            .post_task("plan.yaml", 1, &task, &failed_result("1"))
            .await
            .unwrap();

        hooks.pre_task("plan.yaml", &mut task, true).await.unwrap();

        assert!(task.prompt.contains("previous attempts") || task.prompt.contains("past failures"));
    }

    #[tokio::test]
    async fn post_task_records_failure_patterns_only_on_failure() {
        let store = Arc::new(InMemoryLearningStore::new());
        let hooks = LearningHooks::new(store.clone());
        let task = Task::new("1", "n", "p");

        hooks
            .post_task("plan.yaml", 1, &task, &failed_result("1"))
            .await
            .unwrap();

        let analysis = store.analyze_failures("plan.yaml", &TaskNumber::new("1")).await.unwrap();
        assert_eq!(analysis.failed_attempts, 1);
        assert!(!analysis.common_patterns.is_empty());
    }

    #[tokio::test]
    async fn pre_task_switches_agent_when_history_recommends_it() {
        let store = Arc::new(InMemoryLearningStore::new());
        let hooks = LearningHooks::new(store);
        let mut task = Task::new("1", "n", "p").with_agent("claude");

        hooks.post_task("plan.yaml", 1, &task, &failed_result("1")).await.unwrap();
        hooks.post_task("plan.yaml", 2, &task, &failed_result("1")).await.unwrap();

        hooks.pre_task("plan.yaml", &mut task, true).await.unwrap();
        assert_ne!(task.agent.as_deref(), Some("claude"));
    }

    #[tokio::test]
    async fn pre_task_leaves_agent_untouched_when_auto_adapt_disabled() {
        let store = Arc::new(InMemoryLearningStore::new());
        let hooks = LearningHooks::new(store);
        let mut task = Task::new("1", "n", "p").with_agent("claude");

        hooks.post_task("plan.yaml", 1, &task, &failed_result("1")).await.unwrap();
        hooks.post_task("plan.yaml", 2, &task, &failed_result("1")).await.unwrap();

        hooks.pre_task("plan.yaml", &mut task, false).await.unwrap();
        assert_eq!(task.agent.as_deref(), Some("claude"));
    }
}
