//! Learning store contract and pre/post-task hooks.
//!
//! Durable persistence is an external concern; this crate owns the
//! `LearningStore` trait, a `DashMap`-backed in-memory implementation
//! callers can use directly or wrap, and the hooks that adapt a task's
//! prompt/agent before invocation and record the outcome afterward.

mod hooks;
mod patterns;
mod store;

pub use hooks::LearningHooks;
pub use patterns::extract_failure_patterns;
pub use store::{InMemoryLearningStore, LearningError, LearningStore, SessionMetrics};
