use crate::config::OrchestratorConfig;
use crate::task_executor::{TaskExecutor, TaskExecutorDeps};
use crate::wave_executor::WaveExecutor;
use orc_errors::OrcError;
use orc_learning::LearningStore;
use orc_locks::PackageGuard;
use orc_types::{ExecutionResult, Plan};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Runs an entire [`Plan`] to completion: one wave after another, in
/// declaration order, aggregating every task's result into a single
/// [`ExecutionResult`].
///
/// Unlike [`WaveExecutor`], which fans a wave's tasks out concurrently,
/// waves themselves always run sequentially — a later wave's tasks may
/// assume an earlier wave's tasks already landed.
pub struct Orchestrator {
    config: OrchestratorConfig,
    wave_executor: WaveExecutor,
    learning_store: Arc<dyn LearningStore>,
}

impl Orchestrator {
    /// Build an orchestrator from its collaborators.
    #[must_use]
    pub fn new(config: OrchestratorConfig, deps: TaskExecutorDeps, learning_store: Arc<dyn LearningStore>) -> Self {
        let package_guard = Arc::new(PackageGuard::new());
        let task_executor = Arc::new(TaskExecutor::new(config.task.clone(), deps));
        let wave_executor = WaveExecutor::new(config.clone(), task_executor, package_guard);
        Self {
            config,
            wave_executor,
            learning_store,
        }
    }

    /// Execute every wave in `plan`, in order, against plan file
    /// `plan_file`. The plan is assumed to already have passed
    /// [`Plan::validate`]; this does not re-check structural invariants.
    #[instrument(skip(self, plan, cancel), fields(plan_file = %plan_file))]
    pub async fn execute(&self, plan_file: &str, plan: &mut Plan, cancel: &CancellationToken) -> Result<ExecutionResult, OrcError> {
        let run_number = self
            .learning_store
            .start_run(plan_file)
            .await
            .map_err(|e| OrcError::InvalidPlan(e.to_string()))?;

        let started = Instant::now();
        let mut all_results = Vec::new();

        for wave in plan.waves.clone() {
            info!(wave = %wave.name, tasks = wave.tasks.len(), "starting wave");
            let outcome = self
                .wave_executor
                .execute(plan_file, run_number, &wave, &mut plan.tasks, cancel)
                .await?;

            let any_failed = outcome.results.iter().any(|r| !r.succeeded());
            all_results.extend(outcome.results);

            if any_failed && self.config.fail_fast {
                error!(wave = %wave.name, "stopping plan execution: fail-fast triggered by wave failure");
                break;
            }
            if cancel.is_cancelled() {
                info!("plan execution cancelled, stopping before remaining waves");
                break;
            }
        }

        Ok(ExecutionResult::from_results(&all_results, &plan.tasks, started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc_tracker::NullLocTracker;
    use orc_classify::ErrorClassifier;
    use orc_learning::InMemoryLearningStore;
    use orc_locks::FileLockManager;
    use orc_test_utils::{AlwaysSucceedsInvoker, AlwaysSucceedsRunner, FixedVerdictReviewer, RecordingUpdater};
    use orc_types::{Status, Task, TaskNumber, Wave};
    use std::collections::BTreeMap;

    fn deps(reviewer_flag: Status) -> TaskExecutorDeps {
        TaskExecutorDeps {
            invoker: Arc::new(AlwaysSucceedsInvoker),
            reviewer: Arc::new(FixedVerdictReviewer::new(reviewer_flag, "scripted verdict")),
            updater: Arc::new(RecordingUpdater::default()),
            command_runner: Arc::new(AlwaysSucceedsRunner),
            classifier: Arc::new(ErrorClassifier::new()),
            learning: Arc::new(orc_learning::LearningHooks::new(Arc::new(InMemoryLearningStore::new()))),
            loc_tracker: Arc::new(NullLocTracker),
            file_locks: Arc::new(FileLockManager::new()),
        }
    }

    #[tokio::test]
    async fn executes_every_wave_in_order() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            deps(Status::Green),
            Arc::new(InMemoryLearningStore::new()),
        );

        let mut tasks = BTreeMap::new();
        tasks.insert(TaskNumber::new("1"), Task::new("1", "a", "p"));
        tasks.insert(TaskNumber::new("2"), Task::new("2", "b", "p"));
        let mut plan = Plan::new(
            vec![Wave::new("wave-1").with_task("1"), Wave::new("wave-2").with_task("2")],
            tasks,
        );

        let cancel = CancellationToken::new();
        let result = orchestrator.execute("plan.yaml", &mut plan, &cancel).await.unwrap();
        assert_eq!(result.total_tasks, 2);
        assert_eq!(result.completed, 2);
        assert_eq!(result.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn fail_fast_stops_before_later_waves() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default().with_fail_fast(true),
            deps(Status::Red),
            Arc::new(InMemoryLearningStore::new()),
        );

        let mut tasks = BTreeMap::new();
        tasks.insert(TaskNumber::new("1"), Task::new("1", "a", "p"));
        tasks.insert(TaskNumber::new("2"), Task::new("2", "b", "p"));
        let mut plan = Plan::new(
            vec![Wave::new("wave-1").with_task("1"), Wave::new("wave-2").with_task("2")],
            tasks,
        );

        let cancel = CancellationToken::new();
        let result = orchestrator.execute("plan.yaml", &mut plan, &cancel).await.unwrap();
        assert_eq!(result.total_tasks, 1);
        assert_eq!(result.failed, 1);
    }
}
