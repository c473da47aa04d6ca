//! File and package lock managers.
//!
//! Both locks are built on the same FIFO mutex primitive: a `DashMap`
//! of per-key state guarded by `parking_lot::Mutex`, with waiters
//! queued in a `VecDeque` and woken in arrival order on release. A bare
//! `tokio::sync::Mutex` does not document a wake order, and callers
//! serializing file/package access need one that does.

mod file_lock;
mod package_guard;

pub use file_lock::{FileLockGuard, FileLockManager};
pub use package_guard::{detect_package_conflicts, PackageConflict, PackageGuard, PackageLockGuard};
