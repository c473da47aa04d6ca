use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Default)]
struct LockState {
    held: bool,
    held_by: Option<String>,
    waiters: VecDeque<(Option<String>, oneshot::Sender<()>)>,
}

/// Serializes access to individual files across concurrently executing
/// tasks within a wave.
///
/// Keys are reference-counted and created lazily on first acquisition;
/// they are never removed, matching this component's lifetime (one
/// manager per execution, not per wave).
#[derive(Default)]
pub struct FileLockManager {
    locks: DashMap<PathBuf, Arc<Mutex<LockState>>>,
}

impl FileLockManager {
    /// Create an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `path`, waiting in FIFO order behind any
    /// task already holding or queued for it.
    pub async fn acquire(&self, path: impl AsRef<Path>) -> FileLockGuard {
        self.acquire_named(path, None).await
    }

    /// Acquire the lock for `path`, recording `holder` so [`holder`]
    /// can later report who is holding it. Still waits FIFO like
    /// [`acquire`].
    ///
    /// [`holder`]: FileLockManager::holder
    /// [`acquire`]: FileLockManager::acquire
    pub async fn acquire_named(&self, path: impl AsRef<Path>, holder: Option<String>) -> FileLockGuard {
        let path = path.as_ref().to_path_buf();
        let state = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LockState::default())))
            .clone();

        loop {
            let waiter = {
                let mut guard = state.lock();
                if guard.held {
                    let (tx, rx) = oneshot::channel();
                    guard.waiters.push_back((holder.clone(), tx));
                    Some(rx)
                } else {
                    guard.held = true;
                    guard.held_by = holder.clone();
                    None
                }
            };

            match waiter {
                None => break,
                Some(rx) => {
                    trace!(path = %path.display(), "waiting for file lock");
                    let _ = rx.await;
                }
            }
        }

        FileLockGuard { path, state }
    }

    /// Attempt to acquire the lock for `path` without waiting. Returns
    /// `None` if it is already held, rather than enqueuing behind it.
    #[must_use]
    pub fn try_acquire(&self, path: impl AsRef<Path>) -> Option<FileLockGuard> {
        self.try_acquire_named(path, None)
    }

    /// Non-blocking [`acquire_named`](FileLockManager::acquire_named):
    /// succeeds only if the lock is free, recording `holder` on
    /// success.
    #[must_use]
    pub fn try_acquire_named(&self, path: impl AsRef<Path>, holder: Option<String>) -> Option<FileLockGuard> {
        let path = path.as_ref().to_path_buf();
        let state = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LockState::default())))
            .clone();

        let mut guard = state.lock();
        if guard.held {
            None
        } else {
            guard.held = true;
            guard.held_by = holder;
            drop(guard);
            Some(FileLockGuard { path, state })
        }
    }

    /// Whether `path` is currently held by anyone.
    #[must_use]
    pub fn is_held(&self, path: impl AsRef<Path>) -> bool {
        self.locks.get(path.as_ref()).map(|s| s.lock().held).unwrap_or(false)
    }

    /// The identity passed to [`acquire_named`](FileLockManager::acquire_named)
    /// or [`try_acquire_named`](FileLockManager::try_acquire_named) by
    /// whoever currently holds `path`, if any and if tracked.
    #[must_use]
    pub fn holder(&self, path: impl AsRef<Path>) -> Option<String> {
        self.locks.get(path.as_ref()).and_then(|s| s.lock().held_by.clone())
    }

    /// Number of distinct paths this manager has ever seen a lock
    /// request for.
    #[must_use]
    pub fn known_paths(&self) -> usize {
        self.locks.len()
    }
}

/// RAII guard for a held file lock. Dropping it releases the lock and
/// wakes the next FIFO waiter, if any.
pub struct FileLockGuard {
    path: PathBuf,
    state: Arc<Mutex<LockState>>,
}

impl FileLockGuard {
    /// Path this guard holds the lock for.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let mut guard = self.state.lock();
        match guard.waiters.pop_front() {
            Some((holder, sender)) => {
                // Ownership transfers directly to the woken waiter;
                // `held` never observably toggles false in between.
                guard.held_by = holder;
                let _ = sender.send(());
            }
            None => {
                guard.held = false;
                guard.held_by = None;
            }
        }
    }
}
