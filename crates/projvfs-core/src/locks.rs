//! Lock primitives.
//!
//! Mutexes in the core are allocated from a named [`LockGroup`] so that
//! diagnostics can attribute them. The group keeps a live count;
//! [`LockGroup::shutdown`] reports mutexes that are still allocated,
//! which at module stop means an interceptor thread is still parked
//! inside the core.
//!
//! All mutexes are plain: non-recursive, no reader/writer mode. A
//! poisoned mutex is recovered with the inner state, since every
//! critical section in the core leaves the guarded data consistent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

#[derive(Debug)]
struct GroupInner {
    name: String,
    live: AtomicUsize,
}

/// A named group that mutexes are allocated from.
#[derive(Debug, Clone)]
pub struct LockGroup {
    inner: Arc<GroupInner>,
}

impl LockGroup {
    /// Creates a group with the given diagnostic name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// The group's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Allocates a labelled mutex from this group.
    #[must_use]
    pub fn mutex<T>(&self, label: &'static str, value: T) -> GroupMutex<T> {
        self.inner.live.fetch_add(1, Ordering::Relaxed);
        debug!(group = %self.inner.name, label, "mutex allocated");
        GroupMutex {
            label,
            group: Arc::clone(&self.inner),
            inner: Mutex::new(value),
        }
    }

    /// Number of mutexes currently allocated from this group.
    #[must_use]
    pub fn live_mutexes(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Reports leftover mutexes at group teardown and returns their count.
    #[must_use]
    pub fn shutdown(&self) -> usize {
        let live = self.live_mutexes();
        if live != 0 {
            warn!(
                group = %self.inner.name,
                live,
                "lock group shut down with mutexes still allocated"
            );
        }
        live
    }
}

/// A plain mutex allocated from a [`LockGroup`].
#[derive(Debug)]
pub struct GroupMutex<T> {
    label: &'static str,
    group: Arc<GroupInner>,
    inner: Mutex<T>,
}

impl<T> GroupMutex<T> {
    /// Acquires the mutex, blocking the calling thread.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The label the mutex was allocated under.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }
}

impl<T> Drop for GroupMutex<T> {
    fn drop(&mut self) {
        self.group.live.fetch_sub(1, Ordering::Relaxed);
    }
}
