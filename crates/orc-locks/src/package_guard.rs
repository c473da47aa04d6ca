use crate::file_lock::{FileLockGuard, FileLockManager};
use orc_types::TaskNumber;
use std::path::PathBuf;

/// Serializes access to shared packages across concurrently executing
/// tasks, avoiding deadlock by always acquiring in lexicographic order
/// regardless of the order the caller names them in.
#[derive(Default)]
pub struct PackageGuard {
    inner: FileLockManager,
}

impl PackageGuard {
    /// Create an empty package guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every package in `packages` for `task_number`, in
    /// lexicographic order, holding them all until the returned guard
    /// is dropped.
    ///
    /// Sorting before acquisition (rather than acquiring in
    /// caller-supplied order) is what prevents two tasks that both
    /// need packages `a` and `b` from deadlocking by acquiring them in
    /// opposite order.
    pub async fn acquire(&self, task_number: TaskNumber, packages: &[String]) -> PackageLockGuard {
        let sorted = Self::sorted(packages);
        let holder = task_number.to_string();

        let mut guards = Vec::with_capacity(sorted.len());
        for package in sorted {
            guards.push(self.inner.acquire_named(PathBuf::from(package), Some(holder.clone())).await);
        }

        PackageLockGuard { task_number, guards }
    }

    /// Non-blocking, all-or-nothing variant of [`acquire`](PackageGuard::acquire):
    /// succeeds only if every package in `packages` is currently free,
    /// releasing any it did grab along the way if one is already held.
    #[must_use]
    pub fn try_acquire(&self, task_number: TaskNumber, packages: &[String]) -> Option<PackageLockGuard> {
        let sorted = Self::sorted(packages);
        let holder = task_number.to_string();

        let mut guards = Vec::with_capacity(sorted.len());
        for package in sorted {
            match self.inner.try_acquire_named(PathBuf::from(package), Some(holder.clone())) {
                Some(guard) => guards.push(guard),
                None => return None,
            }
        }

        Some(PackageLockGuard { task_number, guards })
    }

    /// Whether `package` is currently held by any task.
    #[must_use]
    pub fn is_held(&self, package: &str) -> bool {
        self.inner.is_held(PathBuf::from(package))
    }

    /// The task currently holding `package`, if any.
    #[must_use]
    pub fn get_holder(&self, package: &str) -> Option<TaskNumber> {
        self.inner.holder(PathBuf::from(package)).map(TaskNumber::new)
    }

    fn sorted(packages: &[String]) -> Vec<&String> {
        let mut sorted: Vec<&String> = packages.iter().collect();
        sorted.sort();
        sorted.dedup();
        sorted
    }
}

/// RAII guard holding every package lock acquired for a task. Dropping
/// it releases them all.
pub struct PackageLockGuard {
    task_number: TaskNumber,
    guards: Vec<FileLockGuard>,
}

impl PackageLockGuard {
    /// Task number this guard was acquired for.
    #[must_use]
    pub fn task_number(&self) -> &TaskNumber {
        &self.task_number
    }

    /// Packages currently held, in acquisition order.
    #[must_use]
    pub fn held_packages(&self) -> Vec<String> {
        self.guards
            .iter()
            .map(|g| g.path().to_string_lossy().into_owned())
            .collect()
    }
}

/// A pair of tasks within the same wave that declare overlapping
/// package sets. Execution still proceeds safely thanks to
/// [`PackageGuard`]'s serialization, but conflicts are worth
/// surfacing since they silently reduce a wave's effective
/// concurrency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageConflict {
    /// First task in the pair.
    pub first: TaskNumber,
    /// Second task in the pair.
    pub second: TaskNumber,
    /// Packages both tasks declare.
    pub shared_packages: Vec<String>,
}

/// Find every pair of tasks in `declarations` that share at least one
/// package. `declarations` is `(task_number, packages)` for every task
/// in a single wave.
#[must_use]
pub fn detect_package_conflicts(declarations: &[(TaskNumber, Vec<String>)]) -> Vec<PackageConflict> {
    let mut conflicts = Vec::new();

    for i in 0..declarations.len() {
        for j in (i + 1)..declarations.len() {
            let (first, first_packages) = &declarations[i];
            let (second, second_packages) = &declarations[j];

            let mut shared: Vec<String> = first_packages
                .iter()
                .filter(|p| second_packages.contains(p))
                .cloned()
                .collect();
            if shared.is_empty() {
                continue;
            }
            shared.sort();
            shared.dedup();

            conflicts.push(PackageConflict {
                first: first.clone(),
                second: second.clone(),
                shared_packages: shared,
            });
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn overlapping_packages_are_serialized() {
        let guard = Arc::new(PackageGuard::new());
        let counter = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let guard = guard.clone();
            let counter = counter.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _held = guard
                    .acquire(TaskNumber::new(i.to_string()), &["pkg-a".into(), "pkg-b".into()])
                    .await;
                let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disjoint_packages_run_concurrently() {
        let guard = Arc::new(PackageGuard::new());
        let a = guard.acquire(TaskNumber::new("1"), &["pkg-a".into()]).await;
        let b_fut = guard.acquire(TaskNumber::new("2"), &["pkg-b".into()]);
        let b = tokio::time::timeout(Duration::from_millis(50), b_fut)
            .await
            .expect("disjoint package acquisition should not block");
        assert_eq!(a.held_packages(), vec!["pkg-a".to_string()]);
        assert_eq!(b.held_packages(), vec!["pkg-b".to_string()]);
    }

    #[test]
    fn conflicts_are_detected_pairwise() {
        let declarations = vec![
            (TaskNumber::new("1"), vec!["a".to_string(), "b".to_string()]),
            (TaskNumber::new("2"), vec!["b".to_string()]),
            (TaskNumber::new("3"), vec!["c".to_string()]),
        ];
        let conflicts = detect_package_conflicts(&declarations);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].first, TaskNumber::new("1"));
        assert_eq!(conflicts[0].second, TaskNumber::new("2"));
        assert_eq!(conflicts[0].shared_packages, vec!["b".to_string()]);
    }

    #[test]
    fn try_acquire_fails_all_or_nothing_when_one_package_is_held() {
        let guard = PackageGuard::new();
        let _first = guard
            .try_acquire(TaskNumber::new("1"), &["pkg-a".to_string()])
            .expect("pkg-a should be free");
        let attempt = guard.try_acquire(TaskNumber::new("2"), &["pkg-a".to_string(), "pkg-b".to_string()]);
        assert!(attempt.is_none());
        // pkg-b must not have been left held by the failed attempt.
        assert!(!guard.is_held("pkg-b"));
    }

    #[test]
    fn is_held_and_get_holder_reflect_current_owner() {
        let guard = PackageGuard::new();
        assert!(!guard.is_held("pkg-a"));
        assert_eq!(guard.get_holder("pkg-a"), None);

        let held = guard.try_acquire(TaskNumber::new("7"), &["pkg-a".to_string()]).unwrap();
        assert!(guard.is_held("pkg-a"));
        assert_eq!(guard.get_holder("pkg-a"), Some(TaskNumber::new("7")));

        drop(held);
        assert!(!guard.is_held("pkg-a"));
        assert_eq!(guard.get_holder("pkg-a"), None);
    }
}
