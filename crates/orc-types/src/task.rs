use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Opaque task identifier as declared in the plan file (e.g. `"3.2"`).
///
/// Unlike the generated IDs the orchestrator's collaborators use
/// internally, task numbers are author-supplied and therefore a plain
/// newtype over `String` rather than a generated identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskNumber(pub String);

impl TaskNumber {
    /// Wrap any string-like value as a task number.
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying identifier.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskNumber {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskNumber {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A small, closed value type for `Task::metadata`, mirroring how
/// open string-keyed directive maps are expressed elsewhere in this
/// style of codebase: a fixed set of primitive shapes rather than an
/// arbitrary `serde_json::Value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// A plain string value.
    Str(String),
    /// A signed integer value.
    Int(i64),
    /// A boolean flag.
    Bool(bool),
    /// A list of strings.
    List(Vec<String>),
}

/// A documentation location a task is expected to update, and the
/// section within it that must change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationTarget {
    /// Path to the documentation file.
    pub location: PathBuf,
    /// Section heading or anchor expected to change.
    pub section: String,
}

impl DocumentationTarget {
    /// Create a new documentation target.
    #[inline]
    #[must_use]
    pub fn new(location: impl Into<PathBuf>, section: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            section: section.into(),
        }
    }
}

/// Coarse classification of a task's shape, used to select invocation
/// and review policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    /// A documentation-only task: verified by target/section presence,
    /// not by test commands.
    Documentation,
    /// A cross-cutting integration task spanning multiple packages.
    Integration,
    /// An ordinary code task.
    Regular,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Regular
    }
}

/// A single unit of work within a plan wave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier declared by the plan.
    pub number: TaskNumber,
    /// Human-readable name.
    pub name: String,
    /// Prompt handed to the invoked agent.
    pub prompt: String,
    /// Preferred agent, if the plan pins one.
    pub agent: Option<String>,
    /// Files the task is expected to touch.
    pub files: Vec<String>,
    /// Packages the task touches, for package-level lock serialization.
    pub packages: Vec<String>,
    /// Shell commands run to validate the task after invocation.
    pub test_commands: Vec<String>,
    /// Documentation locations the task must keep in sync.
    pub documentation_targets: Vec<DocumentationTarget>,
    /// Author's estimate of how long the task should take.
    pub estimated_time: Option<Duration>,
    /// Coarse task shape.
    pub task_type: TaskType,
    /// Task numbers that must complete before this one may run.
    pub depends_on: Vec<TaskNumber>,
    /// Plan file this task was declared in, if known.
    pub source_file: Option<PathBuf>,
    /// Lines added by the task's most recent execution.
    pub lines_added: u64,
    /// Lines deleted by the task's most recent execution.
    pub lines_deleted: u64,
    /// Open string-keyed metadata the plan may attach to a task.
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Task {
    /// Create a new task with the required fields, leaving optional
    /// fields at their defaults.
    #[inline]
    #[must_use]
    pub fn new(number: impl Into<TaskNumber>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            name: name.into(),
            prompt: prompt.into(),
            agent: None,
            files: Vec::new(),
            packages: Vec::new(),
            test_commands: Vec::new(),
            documentation_targets: Vec::new(),
            estimated_time: None,
            task_type: TaskType::Regular,
            depends_on: Vec::new(),
            source_file: None,
            lines_added: 0,
            lines_deleted: 0,
            metadata: BTreeMap::new(),
        }
    }

    /// Pin a preferred agent.
    #[inline]
    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Attach the files the task is expected to touch.
    #[inline]
    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    /// Attach the packages the task touches.
    #[inline]
    #[must_use]
    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    /// Attach test commands.
    #[inline]
    #[must_use]
    pub fn with_test_commands(mut self, commands: Vec<String>) -> Self {
        self.test_commands = commands;
        self
    }

    /// Attach documentation targets.
    #[inline]
    #[must_use]
    pub fn with_documentation_targets(mut self, targets: Vec<DocumentationTarget>) -> Self {
        self.documentation_targets = targets;
        self
    }

    /// Declare a dependency on another task.
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, number: impl Into<TaskNumber>) -> Self {
        self.depends_on.push(number.into());
        self
    }

    /// Set the task's coarse type.
    #[inline]
    #[must_use]
    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Whether this task is a documentation task, for which test
    /// commands are not run and documentation-target presence governs
    /// verification instead.
    #[inline]
    #[must_use]
    pub fn is_documentation(&self) -> bool {
        self.task_type == TaskType::Documentation
    }

    /// Record the line delta observed for the task's most recent
    /// execution.
    pub fn record_line_delta(&mut self, added: u64, deleted: u64) {
        self.lines_added = added;
        self.lines_deleted = deleted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_builds_with_defaults() {
        let task = Task::new("1.1", "write docs", "do the thing");
        assert_eq!(task.number.as_str(), "1.1");
        assert!(task.depends_on.is_empty());
        assert_eq!(task.task_type, TaskType::Regular);
        assert!(!task.is_documentation());
    }

    #[test]
    fn task_builder_chains() {
        let task = Task::new("2.0", "n", "p")
            .with_agent("claude")
            .with_task_type(TaskType::Documentation)
            .depends_on("1.0");
        assert_eq!(task.agent.as_deref(), Some("claude"));
        assert!(task.is_documentation());
        assert_eq!(task.depends_on, vec![TaskNumber::new("1.0")]);
    }

    #[test]
    fn task_number_display_roundtrips() {
        let n = TaskNumber::from("3.4");
        assert_eq!(n.to_string(), "3.4");
    }
}
