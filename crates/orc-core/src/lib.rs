//! Plan execution core.
//!
//! Wires together error classification, locking, and learning into the
//! task executor, wave executor, and top-level orchestrator: the parts
//! of this workspace that actually drive a plan to completion.

pub mod anomaly;
pub mod collaborators;
pub mod config;
pub mod loc_tracker;
pub mod orchestrator;
pub mod task_executor;
pub mod wave_executor;

pub use anomaly::{AnomalyMonitor, AnomalyMonitorConfig};
pub use collaborators::{CommandOutput, CommandRunner, InvocationResult, Invoker, PlanUpdate, Reviewer, ReviewContext, Updater};
pub use config::{OrchestratorConfig, TaskExecutorConfig};
pub use loc_tracker::{GitLocTracker, LocBaseline, LocDelta, LocTrackerHook, NullLocTracker};
pub use orchestrator::Orchestrator;
pub use task_executor::{TaskExecutor, TaskExecutorDeps};
pub use wave_executor::{WaveExecutor, WaveOutcome};
