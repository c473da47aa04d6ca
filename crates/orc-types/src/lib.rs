//! Data model for the plan execution orchestrator.
//!
//! Defines the fundamental types shared across the orchestrator crates:
//! - plans, waves and tasks
//! - task results and QC review outcomes
//! - anomalies, error patterns and detected errors
//! - learning records

mod execution;
mod plan;
mod task;

pub use execution::{
    AnomalyType, CriterionResult, DetectedError, DetectionMethod, ErrorCategory, ErrorPattern,
    ExecutionResult, FailureAnalysis, FailurePattern, ReviewFlag, ReviewResult, Severity, Status,
    TaskExecution, TaskResult, WaveAnomaly,
};
pub use plan::{Plan, PlanError, Wave};
pub use task::{DocumentationTarget, MetadataValue, Task, TaskNumber, TaskType};

/// Crate version, surfaced for diagnostics the way sibling orchestrator
/// crates do.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
