use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration governing a single task's execution. Loading this
/// from a config file is an external concern; this type only defines
/// the typed shape a loader would populate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutorConfig {
    /// Maximum retry attempts after an initial `Red` review, before a
    /// task is marked `Failed`.
    pub max_retries: u32,
    /// Timeout for a single agent invocation.
    #[serde(with = "duration_secs")]
    pub invoke_timeout: Duration,
    /// Timeout for a single test command.
    #[serde(with = "duration_secs")]
    pub test_command_timeout: Duration,
    /// Timeout for a single QC review pass.
    #[serde(with = "duration_secs")]
    pub review_timeout: Duration,
    /// Path to the plan file tasks are read from and progress is
    /// written back to.
    #[serde(default)]
    pub plan_path: Option<PathBuf>,
    /// Agent applied to a task whose own `agent` field is unset.
    #[serde(default)]
    pub default_agent: Option<String>,
    /// Whether the reviewer runs at all. When `false`, every
    /// successful invocation completes as `Green` without QC.
    #[serde(default = "default_true")]
    pub qc_enabled: bool,
    /// Whether stderr/stdout from a failed test command is run through
    /// the error-pattern classifier.
    #[serde(default = "default_true")]
    pub enable_error_pattern_detection: bool,
    /// Whether a task's declared `test_commands` are run at all. When
    /// `false`, the awaiting-tests phase is skipped entirely.
    #[serde(default = "default_true")]
    pub enforce_test_commands: bool,
    /// Whether learning-history hooks are allowed to overwrite a
    /// task's `agent` before invocation.
    #[serde(default = "default_true")]
    pub auto_adapt_agent: bool,
    /// File lock acquired before running a task, when set; falls back
    /// to `plan_path` when unset.
    #[serde(default)]
    pub source_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            invoke_timeout: Duration::from_secs(600),
            test_command_timeout: Duration::from_secs(300),
            review_timeout: Duration::from_secs(120),
            plan_path: None,
            default_agent: None,
            qc_enabled: true,
            enable_error_pattern_detection: true,
            enforce_test_commands: true,
            auto_adapt_agent: true,
            source_file: None,
        }
    }
}

impl TaskExecutorConfig {
    /// Create a config with the default timeouts and retry budget.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the retry budget.
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the invocation timeout.
    #[inline]
    #[must_use]
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// Override the plan path tasks are read from and progress is
    /// written back to.
    #[inline]
    #[must_use]
    pub fn with_plan_path(mut self, plan_path: impl Into<PathBuf>) -> Self {
        self.plan_path = Some(plan_path.into());
        self
    }

    /// Override the default agent applied when a task's own `agent` is
    /// unset.
    #[inline]
    #[must_use]
    pub fn with_default_agent(mut self, agent: impl Into<String>) -> Self {
        self.default_agent = Some(agent.into());
        self
    }

    /// Enable or disable QC review.
    #[inline]
    #[must_use]
    pub fn with_qc_enabled(mut self, qc_enabled: bool) -> Self {
        self.qc_enabled = qc_enabled;
        self
    }

    /// Enable or disable error-pattern classification of failed test
    /// commands.
    #[inline]
    #[must_use]
    pub fn with_enable_error_pattern_detection(mut self, enabled: bool) -> Self {
        self.enable_error_pattern_detection = enabled;
        self
    }

    /// Enable or disable running a task's declared test commands.
    #[inline]
    #[must_use]
    pub fn with_enforce_test_commands(mut self, enabled: bool) -> Self {
        self.enforce_test_commands = enabled;
        self
    }

    /// Enable or disable learning-history agent switching.
    #[inline]
    #[must_use]
    pub fn with_auto_adapt_agent(mut self, enabled: bool) -> Self {
        self.auto_adapt_agent = enabled;
        self
    }
}

/// Configuration governing wave and plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks dispatched concurrently within a wave.
    pub max_concurrency: usize,
    /// Whether a wave stops dispatching new tasks once any task in it
    /// has failed.
    pub fail_fast: bool,
    /// Per-task execution settings.
    pub task: TaskExecutorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            fail_fast: false,
            task: TaskExecutorConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Create a config with the defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the wave concurrency limit.
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Override the fail-fast policy.
    #[inline]
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
