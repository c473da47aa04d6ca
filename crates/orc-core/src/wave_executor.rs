use crate::anomaly::AnomalyMonitor;
use crate::config::OrchestratorConfig;
use crate::task_executor::TaskExecutor;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use orc_errors::OrcError;
use orc_locks::PackageGuard;
use orc_types::{Task, TaskNumber, TaskResult, Wave, WaveAnomaly};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Dispatches a wave's tasks in dependency order: a task becomes
/// eligible once every entry in its `depends_on` has reached a
/// terminal state and its declared packages can all be locked.
/// Eligible tasks are dispatched up to the configured concurrency
/// bound; the rest wait for the next completion before re-checking
/// eligibility.
pub struct WaveExecutor {
    config: OrchestratorConfig,
    task_executor: Arc<TaskExecutor>,
    package_guard: Arc<PackageGuard>,
    anomaly_monitor: Arc<AnomalyMonitor>,
}

/// Outcome of running one wave to completion.
#[derive(Debug, Clone)]
pub struct WaveOutcome {
    /// Per-task results, in completion order (not input order). Tasks
    /// skipped under fail-fast have no entry here.
    pub results: Vec<TaskResult>,
    /// Anomalies observed while the wave ran.
    pub anomalies: Vec<WaveAnomaly>,
}

type DispatchOutcome = (TaskNumber, Task, Result<TaskResult, OrcError>);

impl WaveExecutor {
    /// Build a wave executor sharing `task_executor` and `package_guard`
    /// with the rest of the orchestrator.
    #[must_use]
    pub fn new(config: OrchestratorConfig, task_executor: Arc<TaskExecutor>, package_guard: Arc<PackageGuard>) -> Self {
        Self {
            config,
            task_executor,
            package_guard,
            anomaly_monitor: Arc::new(AnomalyMonitor::default()),
        }
    }

    /// Run every task in `wave` to completion, honoring `depends_on`
    /// ordering, the configured concurrency bound, and (when
    /// `fail_fast` is set) skipping new dispatches once any task has
    /// failed.
    #[instrument(skip(self, wave, tasks, cancel), fields(wave = %wave.name))]
    pub async fn execute(
        &self,
        plan_file: &str,
        run_number: u32,
        wave: &Wave,
        tasks: &mut BTreeMap<TaskNumber, Task>,
        cancel: &CancellationToken,
    ) -> Result<WaveOutcome, OrcError> {
        for task_number in &wave.tasks {
            if !tasks.contains_key(task_number) {
                return Err(OrcError::InvalidPlan(format!(
                    "wave {} references unknown task {task_number}",
                    wave.name
                )));
            }
        }

        self.anomaly_monitor.start_wave(&wave.name);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let failed = Arc::new(AtomicBool::new(false));
        let start = Instant::now();

        let mut completed: HashSet<TaskNumber> = HashSet::new();
        let mut dispatched: HashSet<TaskNumber> = HashSet::new();
        let mut finished: HashMap<TaskNumber, Task> = HashMap::new();
        let mut in_flight: FuturesUnordered<tokio::task::JoinHandle<DispatchOutcome>> = FuturesUnordered::new();
        let mut results = Vec::new();
        let mut anomalies = Vec::new();

        loop {
            let ready = ready_tasks(wave, tasks, &completed);
            let mut progressed = false;

            for number in ready {
                if dispatched.contains(&number) {
                    continue;
                }

                let task = tasks.get(&number).expect("validated above").clone();

                if self.config.fail_fast && failed.load(Ordering::SeqCst) {
                    info!(task = %number, "skipping dispatch: a sibling task already failed under fail-fast");
                    dispatched.insert(number.clone());
                    completed.insert(number.clone());
                    finished.insert(number, task);
                    progressed = true;
                    continue;
                }

                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    continue;
                };

                let package_lock = if task.packages.is_empty() {
                    None
                } else {
                    match self.package_guard.try_acquire(number.clone(), &task.packages) {
                        Some(lock) => Some(lock),
                        None => continue,
                    }
                };

                dispatched.insert(number.clone());
                progressed = true;

                let dependencies: Vec<Task> = task
                    .depends_on
                    .iter()
                    .filter_map(|dep| finished.get(dep).cloned())
                    .collect();

                let task_executor = self.task_executor.clone();
                let cancel = cancel.clone();
                let plan_file = plan_file.to_string();
                let mut task = task;

                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    let _package_lock = package_lock;
                    let result = task_executor
                        .execute(&plan_file, run_number, &mut task, &dependencies, &cancel)
                        .await;
                    (task.number.clone(), task, result)
                });

                in_flight.push(handle);
            }

            if in_flight.is_empty() {
                if dispatched.len() >= wave.tasks.len() {
                    break;
                }
                if !progressed {
                    return Err(OrcError::InvalidPlan(format!(
                        "wave {} has unreachable tasks (unmet dependencies or lock contention with no progress)",
                        wave.name
                    )));
                }
                continue;
            }

            let Some(joined) = in_flight.next().await else {
                continue;
            };
            let (number, task, outcome) = joined.map_err(|join_err| {
                OrcError::Execution(orc_errors::ExecutionError::new(
                    orc_errors::Phase::Wave,
                    1,
                    vec![orc_errors::TaskError::new(wave.name.clone(), format!("task panicked: {join_err}"))],
                ))
            })?;

            completed.insert(number.clone());
            tasks.insert(task.number.clone(), task.clone());
            finished.insert(task.number.clone(), task.clone());

            let result = outcome?;

            if !result.succeeded() {
                failed.store(true, Ordering::SeqCst);
            }

            let fired = self
                .anomaly_monitor
                .record(&result.task_number, result.status, result.duration, task.estimated_time);
            for anomaly in &fired {
                warn!(wave = %wave.name, task = %result.task_number, anomaly_type = ?anomaly.anomaly_type, "anomaly detected");
            }
            anomalies.extend(fired);

            results.push(result);
        }

        info!(
            wave = %wave.name,
            tasks = results.len(),
            anomalies = anomalies.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "wave complete"
        );

        Ok(WaveOutcome { results, anomalies })
    }
}

/// Task numbers in `wave` whose `depends_on` entries are all present in
/// `completed`, mirroring [`orc_types::Plan::ready_within`] but over a
/// bare task table rather than a full `Plan`.
fn ready_tasks(wave: &Wave, tasks: &BTreeMap<TaskNumber, Task>, completed: &HashSet<TaskNumber>) -> Vec<TaskNumber> {
    wave.tasks
        .iter()
        .filter(|number| !completed.contains(*number))
        .filter(|number| {
            tasks
                .get(*number)
                .map(|task| task.depends_on.iter().all(|dep| completed.contains(dep)))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CommandOutput, CommandRunner, InvocationResult, Invoker, PlanUpdate, Reviewer, ReviewContext, Updater};
    use crate::config::TaskExecutorConfig;
    use crate::loc_tracker::NullLocTracker;
    use crate::task_executor::TaskExecutorDeps;
    use async_trait::async_trait;
    use orc_classify::ErrorClassifier;
    use orc_learning::{InMemoryLearningStore, LearningHooks};
    use orc_locks::FileLockManager;
    use orc_types::{ReviewResult, Status};
    use std::sync::Mutex as StdMutex;

    struct AlwaysGreenInvoker;

    #[async_trait]
    impl Invoker for AlwaysGreenInvoker {
        async fn invoke(&self, _task: &Task, _cancel: &CancellationToken) -> Result<InvocationResult, OrcError> {
            Ok(InvocationResult {
                output: "ok".into(),
                exit_code: 0,
                files_changed: Vec::new(),
            })
        }
    }

    struct AlwaysGreenReviewer;

    #[async_trait]
    impl Reviewer for AlwaysGreenReviewer {
        async fn review(
            &self,
            _task: &Task,
            _invocation: &InvocationResult,
            _context: &ReviewContext,
            _cancel: &CancellationToken,
        ) -> Result<ReviewResult, OrcError> {
            Ok(ReviewResult::new(Status::Green, "looks good"))
        }
    }

    struct NoopUpdater;

    #[async_trait]
    impl Updater for NoopUpdater {
        async fn update_plan(&self, _task: &Task, _update: PlanUpdate<'_>) -> Result<(), OrcError> {
            Ok(())
        }
    }

    struct NoopRunner;

    #[async_trait]
    impl CommandRunner for NoopRunner {
        async fn run(&self, _command: &str, _cancel: &CancellationToken) -> Result<CommandOutput, OrcError> {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn executor() -> Arc<TaskExecutor> {
        Arc::new(TaskExecutor::new(
            TaskExecutorConfig::default(),
            TaskExecutorDeps {
                invoker: Arc::new(AlwaysGreenInvoker),
                reviewer: Arc::new(AlwaysGreenReviewer),
                updater: Arc::new(NoopUpdater),
                command_runner: Arc::new(NoopRunner),
                classifier: Arc::new(ErrorClassifier::new()),
                learning: Arc::new(LearningHooks::new(Arc::new(InMemoryLearningStore::new()))),
                loc_tracker: Arc::new(NullLocTracker),
                file_locks: Arc::new(FileLockManager::new()),
            },
        ))
    }

    #[tokio::test]
    async fn runs_every_task_in_a_wave() {
        let wave_executor = WaveExecutor::new(OrchestratorConfig::default(), executor(), Arc::new(PackageGuard::new()));
        let mut tasks = BTreeMap::new();
        for n in ["1", "2", "3"] {
            tasks.insert(TaskNumber::new(n), Task::new(n, "n", "p"));
        }
        let wave = Wave::new("wave-1").with_task("1").with_task("2").with_task("3");
        let cancel = CancellationToken::new();
        let outcome = wave_executor.execute("plan.yaml", 1, &wave, &mut tasks, &cancel).await.unwrap();
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results.iter().all(|r| r.succeeded()));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_config() {
        let wave_executor =
            WaveExecutor::new(OrchestratorConfig::default().with_max_concurrency(1), executor(), Arc::new(PackageGuard::new()));
        let mut tasks = BTreeMap::new();
        for n in ["1", "2"] {
            tasks.insert(TaskNumber::new(n), Task::new(n, "n", "p"));
        }
        let wave = Wave::new("wave-1").with_task("1").with_task("2");
        let cancel = CancellationToken::new();
        let outcome = wave_executor.execute("plan.yaml", 1, &wave, &mut tasks, &cancel).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn package_conflicts_still_allow_both_tasks_to_complete() {
        let wave_executor = WaveExecutor::new(OrchestratorConfig::default(), executor(), Arc::new(PackageGuard::new()));
        let mut tasks = BTreeMap::new();
        tasks.insert(
            TaskNumber::new("1"),
            Task::new("1", "n", "p").with_packages(vec!["shared-crate".into()]),
        );
        tasks.insert(
            TaskNumber::new("2"),
            Task::new("2", "n", "p").with_packages(vec!["shared-crate".into()]),
        );
        let wave = Wave::new("wave-1").with_task("1").with_task("2");
        let cancel = CancellationToken::new();
        let outcome = wave_executor.execute("plan.yaml", 1, &wave, &mut tasks, &cancel).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| r.succeeded()));
    }

    #[tokio::test]
    async fn dependent_task_does_not_dispatch_before_its_dependency_completes() {
        let order: Arc<StdMutex<Vec<TaskNumber>>> = Arc::new(StdMutex::new(Vec::new()));

        struct RecordingInvoker {
            order: Arc<StdMutex<Vec<TaskNumber>>>,
        }

        #[async_trait]
        impl Invoker for RecordingInvoker {
            async fn invoke(&self, task: &Task, _cancel: &CancellationToken) -> Result<InvocationResult, OrcError> {
                self.order.lock().unwrap().push(task.number.clone());
                Ok(InvocationResult {
                    output: "ok".into(),
                    exit_code: 0,
                    files_changed: Vec::new(),
                })
            }
        }

        let task_executor = Arc::new(TaskExecutor::new(
            TaskExecutorConfig::default(),
            TaskExecutorDeps {
                invoker: Arc::new(RecordingInvoker { order: order.clone() }),
                reviewer: Arc::new(AlwaysGreenReviewer),
                updater: Arc::new(NoopUpdater),
                command_runner: Arc::new(NoopRunner),
                classifier: Arc::new(ErrorClassifier::new()),
                learning: Arc::new(LearningHooks::new(Arc::new(InMemoryLearningStore::new()))),
                loc_tracker: Arc::new(NullLocTracker),
                file_locks: Arc::new(FileLockManager::new()),
            },
        ));

        let wave_executor = WaveExecutor::new(OrchestratorConfig::default(), task_executor, Arc::new(PackageGuard::new()));
        let mut tasks = BTreeMap::new();
        tasks.insert(TaskNumber::new("1"), Task::new("1", "a", "p"));
        tasks.insert(TaskNumber::new("2"), Task::new("2", "b", "p").depends_on("1"));
        let wave = Wave::new("wave-1").with_task("2").with_task("1");
        let cancel = CancellationToken::new();
        let outcome = wave_executor.execute("plan.yaml", 1, &wave, &mut tasks, &cancel).await.unwrap();

        assert_eq!(outcome.results.len(), 2);
        let seen = order.lock().unwrap();
        let pos_1 = seen.iter().position(|n| n == &TaskNumber::new("1")).unwrap();
        let pos_2 = seen.iter().position(|n| n == &TaskNumber::new("2")).unwrap();
        assert!(pos_1 < pos_2, "dependency must be invoked before its dependent");
    }

    #[tokio::test]
    async fn fail_fast_skips_dependents_of_a_failed_task() {
        struct AlwaysRedReviewer;

        #[async_trait]
        impl Reviewer for AlwaysRedReviewer {
            async fn review(
                &self,
                _task: &Task,
                _invocation: &InvocationResult,
                _context: &ReviewContext,
                _cancel: &CancellationToken,
            ) -> Result<ReviewResult, OrcError> {
                Ok(ReviewResult::new(Status::Red, "nope"))
            }
        }

        let task_executor = Arc::new(TaskExecutor::new(
            TaskExecutorConfig::default().with_max_retries(0),
            TaskExecutorDeps {
                invoker: Arc::new(AlwaysGreenInvoker),
                reviewer: Arc::new(AlwaysRedReviewer),
                updater: Arc::new(NoopUpdater),
                command_runner: Arc::new(NoopRunner),
                classifier: Arc::new(ErrorClassifier::new()),
                learning: Arc::new(LearningHooks::new(Arc::new(InMemoryLearningStore::new()))),
                loc_tracker: Arc::new(NullLocTracker),
                file_locks: Arc::new(FileLockManager::new()),
            },
        ));

        let wave_executor =
            WaveExecutor::new(OrchestratorConfig::default().with_fail_fast(true), task_executor, Arc::new(PackageGuard::new()));
        let mut tasks = BTreeMap::new();
        tasks.insert(TaskNumber::new("1"), Task::new("1", "a", "p"));
        tasks.insert(TaskNumber::new("2"), Task::new("2", "b", "p").depends_on("1"));
        let wave = Wave::new("wave-1").with_task("1").with_task("2");
        let cancel = CancellationToken::new();
        let outcome = wave_executor.execute("plan.yaml", 1, &wave, &mut tasks, &cancel).await.unwrap();

        // task 2 depends on the failed task 1 and is skipped rather than
        // ever invoked, so only task 1's result is reported.
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].task_number, TaskNumber::new("1"));
    }
}
