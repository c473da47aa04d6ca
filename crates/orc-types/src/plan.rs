use crate::task::{Task, TaskNumber};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// A named, ordered group of tasks that may run concurrently with each
/// other but not with tasks in a later wave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wave {
    /// Wave name, used in logs and anomaly reports.
    pub name: String,
    /// Task numbers belonging to this wave, in declaration order.
    pub tasks: Vec<TaskNumber>,
}

impl Wave {
    /// Create a new, empty wave.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    /// Append a task number to the wave.
    #[inline]
    #[must_use]
    pub fn with_task(mut self, number: impl Into<TaskNumber>) -> Self {
        self.tasks.push(number.into());
        self
    }
}

/// Invariant violations `Plan::validate` can detect. Parsing the plan
/// from disk is an external concern; this only covers the data model's
/// own soundness once a `Plan` value exists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// A task listed in a wave has no corresponding entry in the task
    /// table.
    #[error("wave {wave:?} references unknown task {task}")]
    UnknownTask {
        /// Wave the dangling reference was found in.
        wave: String,
        /// Task number that does not resolve.
        task: TaskNumber,
    },
    /// A task appears in more than one wave, or not in any wave.
    #[error("task {task} appears in {count} waves (expected exactly 1)")]
    TaskWaveCount {
        /// Offending task number.
        task: TaskNumber,
        /// Observed number of waves containing it.
        count: usize,
    },
    /// A dependency cycle was found among `depends_on` edges.
    #[error("dependency cycle detected, starting at task {task}")]
    Cycle {
        /// A task number participating in the cycle.
        task: TaskNumber,
    },
    /// A task depends on a task number with no matching entry.
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency {
        /// The dependent task.
        task: TaskNumber,
        /// The missing dependency.
        dependency: TaskNumber,
    },
}

/// A parsed, in-memory execution plan: an ordered list of waves plus
/// the task table they reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Waves in execution order.
    pub waves: Vec<Wave>,
    /// All tasks declared by the plan, keyed by task number.
    pub tasks: BTreeMap<TaskNumber, Task>,
}

impl Plan {
    /// Build a plan from its waves and task table without validating
    /// it. Use [`Plan::validate`] before executing.
    #[inline]
    #[must_use]
    pub fn new(waves: Vec<Wave>, tasks: BTreeMap<TaskNumber, Task>) -> Self {
        Self { waves, tasks }
    }

    /// Look up a task by number.
    #[inline]
    #[must_use]
    pub fn task(&self, number: &TaskNumber) -> Option<&Task> {
        self.tasks.get(number)
    }

    /// Total number of tasks declared across all waves.
    #[inline]
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Check the plan's structural invariants: every wave task resolves
    /// to a declared task, every task belongs to exactly one wave, every
    /// dependency resolves, and the dependency graph is acyclic.
    ///
    /// # Errors
    ///
    /// Returns the first violation found; callers that want every
    /// violation should keep calling `validate` after removing offenders,
    /// since the common case is a single malformed plan file.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut wave_counts: BTreeMap<&TaskNumber, usize> = BTreeMap::new();

        for wave in &self.waves {
            for task_number in &wave.tasks {
                if !self.tasks.contains_key(task_number) {
                    return Err(PlanError::UnknownTask {
                        wave: wave.name.clone(),
                        task: task_number.clone(),
                    });
                }
                *wave_counts.entry(task_number).or_insert(0) += 1;
            }
        }

        for number in self.tasks.keys() {
            let count = wave_counts.get(number).copied().unwrap_or(0);
            if count != 1 {
                return Err(PlanError::TaskWaveCount {
                    task: number.clone(),
                    count,
                });
            }
        }

        for task in self.tasks.values() {
            for dependency in &task.depends_on {
                if !self.tasks.contains_key(dependency) {
                    return Err(PlanError::UnknownDependency {
                        task: task.number.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), PlanError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<&TaskNumber, Mark> = BTreeMap::new();

        for start in self.tasks.keys() {
            if marks.contains_key(start) {
                continue;
            }
            let mut stack = vec![(start, self.tasks[start].depends_on.iter())];
            marks.insert(start, Mark::Visiting);

            while let Some((node, iter)) = stack.last_mut() {
                match iter.next() {
                    Some(dependency) => match marks.get(dependency) {
                        Some(Mark::Visiting) => {
                            return Err(PlanError::Cycle {
                                task: start.clone(),
                            })
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(dependency, Mark::Visiting);
                            stack.push((dependency, self.tasks[dependency].depends_on.iter()));
                        }
                    },
                    None => {
                        marks.insert(node, Mark::Done);
                        stack.pop();
                    }
                }
            }
        }

        Ok(())
    }

    /// Task numbers with no unmet dependencies within `completed`.
    #[must_use]
    pub fn ready_within(&self, wave: &Wave, completed: &HashSet<TaskNumber>) -> Vec<TaskNumber> {
        wave.tasks
            .iter()
            .filter(|number| !completed.contains(*number))
            .filter(|number| {
                self.tasks
                    .get(*number)
                    .map(|task| task.depends_on.iter().all(|dep| completed.contains(dep)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}
