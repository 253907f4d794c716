//! Outstanding-request table.
//!
//! Correlates a blocked interceptor thread with the provider response
//! that releases it. Requests are keyed by a monotonic 64-bit id (the id
//! is the natural key, so the table is a map rather than a scan list);
//! each record carries its own monitor (a mutex over the response slot
//! plus a condvar) and the blocked thread sleeps on that monitor in
//! bounded periods, re-checking the received flag after every wake.
//!
//! The table mutex is distinct from the registry mutex: the interceptor
//! holds a record here while a response arrives on another thread, and
//! neither path may wait on the other's lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use nix::unistd::Pid;
use projvfs_wire::MessageKind;
use tracing::debug;

use crate::locks::{GroupMutex, LockGroup};
use crate::registry::ProviderHandle;

/// Outcome of one materialization round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// The provider materialized the target.
    Success,
    /// The provider could not, or was disconnected while we waited.
    Failure,
}

/// Identifying header of an in-flight request.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    /// Monotonically assigned id; never reused within a process lifetime.
    pub request_id: u64,
    /// What the provider was asked to do.
    pub kind: MessageKind,
    /// Pid of the process whose access is blocked.
    pub pid: Pid,
    /// Name of that process.
    pub procname: String,
    /// Path relative to the virtualization root.
    pub relative_path: String,
}

#[derive(Debug, Default)]
struct ResponseSlot {
    response: Option<ResponseStatus>,
}

/// One in-flight request and the monitor its issuer sleeps on.
#[derive(Debug)]
pub struct OutstandingRequest {
    header: RequestHeader,
    routed_to: ProviderHandle,
    state: Mutex<ResponseSlot>,
    wake: Condvar,
}

impl OutstandingRequest {
    /// The request's identifying header.
    #[must_use]
    pub const fn header(&self) -> &RequestHeader {
        &self.header
    }

    /// Records the response and wakes the sleeper. The response slot is
    /// written at most once; later deliveries for the same record are
    /// dropped.
    fn complete(&self, status: ResponseStatus) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.response.is_none() {
            state.response = Some(status);
        }
        drop(state);
        // Wake strictly after the flag is set; a wake that races the
        // sleeper's entry is harmless because the sleeper re-checks.
        self.wake.notify_all();
    }

    /// Blocks until a response is recorded, sleeping in `period`-bounded
    /// stretches. Spurious wakes and timeouts loop back to re-examine
    /// the response slot.
    pub fn wait(&self, period: Duration) -> ResponseStatus {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(status) = state.response {
                return status;
            }
            let (guard, _timeout) = self
                .wake
                .wait_timeout(state, period)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

/// The set of requests currently awaiting provider responses.
pub struct OutstandingRequestTable {
    entries: GroupMutex<HashMap<u64, Arc<OutstandingRequest>>>,
    next_id: AtomicU64,
}

impl OutstandingRequestTable {
    /// Creates an empty table, its mutex allocated from `locks`.
    #[must_use]
    pub fn new(locks: &LockGroup) -> Self {
        Self {
            entries: locks.mutex("outstanding-requests", HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates the next request id. Ids start at 1 and are never
    /// reused; zero is reserved.
    #[must_use]
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Links a request into the table and returns the record its issuer
    /// will sleep on. Must happen before the message is sent, so a
    /// response racing the send still finds the record.
    #[must_use]
    pub fn enqueue(&self, header: RequestHeader, routed_to: ProviderHandle) -> Arc<OutstandingRequest> {
        let request_id = header.request_id;
        let entry = Arc::new(OutstandingRequest {
            header,
            routed_to,
            state: Mutex::new(ResponseSlot::default()),
            wake: Condvar::new(),
        });
        let previous = self.entries.lock().insert(request_id, Arc::clone(&entry));
        debug_assert!(previous.is_none(), "request id {request_id} reused");
        entry
    }

    /// Routes a provider response to the matching record and wakes its
    /// sleeper. Kinds other than success/failure are ignored, as is an
    /// id with no record (the waiter may have timed out and dequeued).
    /// Returns whether a record was completed.
    pub fn deliver(&self, request_id: u64, kind: MessageKind) -> bool {
        let status = match kind {
            MessageKind::ResponseSuccess => ResponseStatus::Success,
            MessageKind::ResponseFailure => ResponseStatus::Failure,
            MessageKind::EnumerateDirectory | MessageKind::HydrateFile => return false,
        };

        let entry = self.entries.lock().get(&request_id).cloned();
        match entry {
            Some(entry) => {
                entry.complete(status);
                true
            }
            None => {
                debug!(request_id, "response for unknown request dropped");
                false
            }
        }
    }

    /// Unlinks a record. Issuers dequeue after they stop waiting,
    /// whatever the outcome.
    pub fn dequeue(&self, request_id: u64) {
        self.entries.lock().remove(&request_id);
    }

    /// Completes every request routed to `handle` with a synthetic
    /// failure, releasing threads blocked on a provider that is going
    /// away. Returns how many were completed.
    pub fn fail_all_routed_to(&self, handle: ProviderHandle) -> usize {
        let targets: Vec<Arc<OutstandingRequest>> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.routed_to == handle)
            .cloned()
            .collect();
        for entry in &targets {
            entry.complete(ResponseStatus::Failure);
        }
        targets.len()
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no request is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
