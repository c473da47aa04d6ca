use async_trait::async_trait;
use dashmap::DashMap;
use orc_types::{FailureAnalysis, FailurePattern, TaskExecution, TaskNumber, TaskResult};
use std::collections::HashMap;
use thiserror::Error;

/// Error returned by a [`LearningStore`] implementation.
#[derive(Debug, Error)]
#[error("learning store error: {0}")]
pub struct LearningError(pub String);

/// Running aggregates for a single `(plan_file, run_number)` session,
/// independent of any one task's own execution history.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionMetrics {
    /// Tasks attempted so far in this session.
    pub total_tasks: u32,
    /// Tasks that completed successfully.
    pub completed_tasks: u32,
    /// Tasks that ended failed.
    pub failed_tasks: u32,
    /// Lines added across every task in the session.
    pub total_lines_added: u64,
    /// Lines deleted across every task in the session.
    pub total_lines_deleted: u64,
}

/// Built-in agent rotation consulted when history recommends switching
/// agents but no richer agent-pool signal is available: the first
/// entry not already in the task's `tried_agents`.
const FALLBACK_AGENT_POOL: &[&str] = &["claude", "gpt-4", "codex"];

/// External collaborator recording and querying task execution
/// history. Durable persistence is the implementation's concern; this
/// trait only defines the contract the orchestrator relies on.
#[async_trait]
pub trait LearningStore: Send + Sync {
    /// Persist one task execution record.
    async fn record_execution(&self, execution: TaskExecution) -> Result<(), LearningError>;

    /// Summarize a task's execution history for adapting the next
    /// attempt. Returns a default, empty analysis when no history
    /// exists yet.
    async fn analyze_failures(
        &self,
        plan_file: &str,
        task_number: &TaskNumber,
    ) -> Result<FailureAnalysis, LearningError>;

    /// Current run number for a plan file (the next execution's run
    /// number is this value plus one).
    async fn run_count(&self, plan_file: &str) -> Result<u32, LearningError>;

    /// Record that a new run of `plan_file` has started, returning its
    /// run number.
    async fn start_run(&self, plan_file: &str) -> Result<u32, LearningError>;

    /// Ensure a session row exists for `(plan_file, run_number)`,
    /// creating it with zeroed aggregates if absent. Idempotent.
    async fn upsert_session(&self, plan_file: &str, run_number: u32) -> Result<(), LearningError>;

    /// Merge `metrics` into the session's running aggregates.
    async fn update_session_aggregates(
        &self,
        plan_file: &str,
        run_number: u32,
        metrics: SessionMetrics,
    ) -> Result<(), LearningError>;

    /// Record one task result's contribution to the session's running
    /// aggregates.
    async fn record_session_metrics(
        &self,
        plan_file: &str,
        run_number: u32,
        result: &TaskResult,
    ) -> Result<(), LearningError>;
}

/// In-memory [`LearningStore`] keyed by `(plan_file, task_number)`.
/// Useful as a default for callers with no durable backing, and as the
/// store under test for the orchestration crates.
#[derive(Default)]
pub struct InMemoryLearningStore {
    executions: DashMap<(String, TaskNumber), Vec<TaskExecution>>,
    run_counts: DashMap<String, u32>,
    sessions: DashMap<(String, u32), SessionMetrics>,
}

impl InMemoryLearningStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current aggregates for a session, if it has been touched.
    #[must_use]
    pub fn session_metrics(&self, plan_file: &str, run_number: u32) -> Option<SessionMetrics> {
        self.sessions.get(&(plan_file.to_string(), run_number)).map(|e| *e)
    }
}

#[async_trait]
impl LearningStore for InMemoryLearningStore {
    async fn record_execution(&self, execution: TaskExecution) -> Result<(), LearningError> {
        let key = (execution.plan_file.clone(), execution.task_number.clone());
        self.executions.entry(key).or_default().push(execution);
        Ok(())
    }

    async fn analyze_failures(
        &self,
        plan_file: &str,
        task_number: &TaskNumber,
    ) -> Result<FailureAnalysis, LearningError> {
        let key = (plan_file.to_string(), task_number.clone());
        let Some(history) = self.executions.get(&key) else {
            return Ok(FailureAnalysis::default());
        };

        let total_attempts = history.len() as u32;
        let failed: Vec<&TaskExecution> = history.iter().filter(|e| !e.success).collect();
        let failed_attempts = failed.len() as u32;

        let mut tried_agents: Vec<String> = history.iter().filter_map(|e| e.agent.clone()).collect();
        tried_agents.sort();
        tried_agents.dedup();

        let mut pattern_counts: HashMap<FailurePattern, u32> = HashMap::new();
        for execution in &failed {
            for pattern in &execution.failure_patterns {
                *pattern_counts.entry(*pattern).or_insert(0) += 1;
            }
        }
        let mut common_patterns: Vec<(FailurePattern, u32)> = pattern_counts.into_iter().collect();
        common_patterns.sort_by(|a, b| b.1.cmp(&a.1));
        let common_patterns: Vec<FailurePattern> = common_patterns.into_iter().map(|(p, _)| p).collect();

        // Two or more consecutive failures with the same agent suggest
        // switching; a single failure does not.
        let should_try_different_agent = failed_attempts >= 2 && tried_agents.len() == 1;
        let suggested_agent = if should_try_different_agent {
            FALLBACK_AGENT_POOL
                .iter()
                .find(|candidate| !tried_agents.iter().any(|tried| tried == *candidate))
                .map(|candidate| (*candidate).to_string())
        } else {
            None
        };
        let suggested_approach = common_patterns.first().map(|pattern| match pattern {
            FailurePattern::CompilationError => "Double-check types and imports before submitting".to_string(),
            FailurePattern::TestFailure => "Run the test commands locally before finishing".to_string(),
            FailurePattern::DependencyMissing => "Verify all dependencies are declared".to_string(),
            FailurePattern::PermissionError => "Avoid operations requiring elevated permissions".to_string(),
            FailurePattern::Timeout => "Break the task into smaller steps to avoid timing out".to_string(),
            FailurePattern::RuntimeError => "Add defensive checks around the failing code path".to_string(),
        });

        Ok(FailureAnalysis {
            total_attempts,
            failed_attempts,
            tried_agents,
            common_patterns,
            suggested_agent,
            suggested_approach,
            should_try_different_agent,
        })
    }

    async fn run_count(&self, plan_file: &str) -> Result<u32, LearningError> {
        Ok(self.run_counts.get(plan_file).map(|v| *v).unwrap_or(0))
    }

    async fn start_run(&self, plan_file: &str) -> Result<u32, LearningError> {
        let mut entry = self.run_counts.entry(plan_file.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn upsert_session(&self, plan_file: &str, run_number: u32) -> Result<(), LearningError> {
        self.sessions
            .entry((plan_file.to_string(), run_number))
            .or_insert_with(SessionMetrics::default);
        Ok(())
    }

    async fn update_session_aggregates(
        &self,
        plan_file: &str,
        run_number: u32,
        metrics: SessionMetrics,
    ) -> Result<(), LearningError> {
        let mut entry = self
            .sessions
            .entry((plan_file.to_string(), run_number))
            .or_insert_with(SessionMetrics::default);
        entry.total_tasks += metrics.total_tasks;
        entry.completed_tasks += metrics.completed_tasks;
        entry.failed_tasks += metrics.failed_tasks;
        entry.total_lines_added += metrics.total_lines_added;
        entry.total_lines_deleted += metrics.total_lines_deleted;
        Ok(())
    }

    async fn record_session_metrics(
        &self,
        plan_file: &str,
        run_number: u32,
        result: &TaskResult,
    ) -> Result<(), LearningError> {
        let metrics = SessionMetrics {
            total_tasks: 1,
            completed_tasks: u32::from(result.succeeded()),
            failed_tasks: u32::from(!result.succeeded()),
            total_lines_added: 0,
            total_lines_deleted: 0,
        };
        self.update_session_aggregates(plan_file, run_number, metrics).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_types::Status;
    use std::time::Duration;

    fn execution(task: &str, success: bool, agent: &str, patterns: Vec<FailurePattern>) -> TaskExecution {
        TaskExecution {
            plan_file: "plan.yaml".into(),
            run_number: 1,
            task_number: TaskNumber::new(task),
            task_name: "name".into(),
            agent: Some(agent.into()),
            prompt: "prompt".into(),
            success,
            qc_verdict: None,
            duration_secs: 1.0,
            lines_added: 0,
            lines_deleted: 0,
            failure_patterns: patterns,
        }
    }

    fn result(task: &str, status: Status) -> TaskResult {
        TaskResult {
            task_number: TaskNumber::new(task),
            status,
            output: String::new(),
            error: None,
            duration: Duration::from_secs(1),
            retry_count: 0,
            review_feedback: None,
        }
    }

    #[tokio::test]
    async fn unknown_task_returns_default_analysis() {
        let store = InMemoryLearningStore::new();
        let analysis = store
            .analyze_failures("plan.yaml", &TaskNumber::new("1"))
            .await
            .unwrap();
        assert_eq!(analysis.total_attempts, 0);
        assert!(!analysis.should_try_different_agent);
    }

    #[tokio::test]
    async fn two_failures_with_same_agent_suggest_switch() {
        let store = InMemoryLearningStore::new();
        store
            .record_execution(execution("1", false, "claude", vec![FailurePattern::CompilationError]))
            .await
            .unwrap();
        store
            .record_execution(execution("1", false, "claude", vec![FailurePattern::CompilationError]))
            .await
            .unwrap();

        let analysis = store.analyze_failures("plan.yaml", &TaskNumber::new("1")).await.unwrap();
        assert_eq!(analysis.total_attempts, 2);
        assert_eq!(analysis.failed_attempts, 2);
        assert!(analysis.should_try_different_agent);
        assert_eq!(analysis.common_patterns.first(), Some(&FailurePattern::CompilationError));
        assert_eq!(analysis.suggested_agent, Some("gpt-4".to_string()));
    }

    #[tokio::test]
    async fn single_failure_does_not_suggest_switch() {
        let store = InMemoryLearningStore::new();
        store
            .record_execution(execution("1", false, "claude", vec![FailurePattern::Timeout]))
            .await
            .unwrap();
        let analysis = store.analyze_failures("plan.yaml", &TaskNumber::new("1")).await.unwrap();
        assert!(!analysis.should_try_different_agent);
        assert_eq!(analysis.suggested_agent, None);
    }

    #[tokio::test]
    async fn run_numbers_increment_per_plan_file() {
        let store = InMemoryLearningStore::new();
        assert_eq!(store.start_run("plan.yaml").await.unwrap(), 1);
        assert_eq!(store.start_run("plan.yaml").await.unwrap(), 2);
        assert_eq!(store.run_count("plan.yaml").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn session_metrics_accumulate_across_tasks() {
        let store = InMemoryLearningStore::new();
        store.upsert_session("plan.yaml", 1).await.unwrap();
        store
            .record_session_metrics("plan.yaml", 1, &result("1", Status::Green))
            .await
            .unwrap();
        store
            .record_session_metrics("plan.yaml", 1, &result("2", Status::Failed))
            .await
            .unwrap();

        let metrics = store.session_metrics("plan.yaml", 1).unwrap();
        assert_eq!(metrics.total_tasks, 2);
        assert_eq!(metrics.completed_tasks, 1);
        assert_eq!(metrics.failed_tasks, 1);
    }

    #[tokio::test]
    async fn upsert_session_is_idempotent() {
        let store = InMemoryLearningStore::new();
        store.upsert_session("plan.yaml", 1).await.unwrap();
        store.upsert_session("plan.yaml", 1).await.unwrap();
        assert_eq!(store.session_metrics("plan.yaml", 1), Some(SessionMetrics::default()));
    }
}
