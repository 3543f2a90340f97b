//! Listener handles for job notifications

use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where a job is in its retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Starting,
    Retrying,
    Finished,
}

/// Progress notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub job_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub phase: SyncPhase,
}

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Listeners for one kind of event
///
/// Callbacks run outside the lock, so a listener may register or remove
/// listeners without deadlocking. A panicking listener is logged and skipped.
pub(crate) struct ListenerSet<A: ?Sized> {
    event: &'static str,
    entries: Mutex<Vec<(ListenerId, Callback<A>)>>,
}

impl<A: ?Sized> ListenerSet<A> {
    pub(crate) fn new(event: &'static str) -> Self {
        Self {
            event,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, callback: Callback<A>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.lock().push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Call every listener; returns how many panicked
    pub(crate) fn notify(&self, job_id: &str, arg: &A) -> usize {
        let callbacks: Vec<Callback<A>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        let mut panicked = 0;
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(arg))).is_err() {
                panicked += 1;
                error!(job_id, event = self.event, "Listener panicked");
            }
        }
        panicked
    }
}
