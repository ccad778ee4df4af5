use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::Error;
use crate::readiness::Readiness;
use crate::ring::EventToken;

/// Attributes for a dispatched task, composable with bitwise-or.
///
/// A cooperative scheduler maps these onto its own task flags; the default
/// thread-backed scheduler has no equivalent and ignores them.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct TaskAttrs(u32);

impl TaskAttrs {
    pub const NORMAL: TaskAttrs = TaskAttrs(0);
    /// The task runs until it returns and is never reaped early by the
    /// scheduler. Set on the completion-loop worker.
    pub const NEVER_QUIT: TaskAttrs = TaskAttrs(1 << 0);
    /// The task is scheduled at global priority and is not descheduled by
    /// ordinary priority inversion. Set on the completion-loop worker.
    pub const GLOBAL_PRIORITY: TaskAttrs = TaskAttrs(1 << 1);

    pub const fn contains(self, other: TaskAttrs) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TaskAttrs {
    type Output = TaskAttrs;

    fn bitor(self, rhs: TaskAttrs) -> TaskAttrs {
        TaskAttrs(self.0 | rhs.0)
    }
}

/// Identifier of a spawned background task. Zero means "no task".
pub type TaskId = u64;

/// The scheduler seam: how the dispatcher spawns and joins its worker.
///
/// An RPC runtime plugs its cooperative scheduler in here; everything else
/// (tests, the examples) uses [`ThreadScheduler`].
pub trait TaskScheduler: Send + Sync + 'static {
    /// Spawn a background task with the given attributes. Returned ids must
    /// be non-zero.
    fn spawn_background(
        &self,
        attrs: TaskAttrs,
        task: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<TaskId, Error>;

    /// Block until the task has completed. Unknown ids are a no-op.
    fn join(&self, id: TaskId);
}

/// Callbacks the dispatcher fires when a registered fd becomes ready.
///
/// The socket layer implements this to route the token back to its
/// connection state. Both hooks receive the task attributes recorded at
/// `start` time so they can spawn follow-up work with the caller's policy.
/// Hooks run on the completion-loop worker and may suspend in the scheduler,
/// but must not block indefinitely: the loop dispatches serially.
pub trait EventHandler: Send + Sync + 'static {
    /// The fd is readable, or carries an error/hang-up condition.
    fn on_input_ready(&self, token: EventToken, events: Readiness, attrs: TaskAttrs);

    /// The fd is writable, or carries an error/hang-up condition.
    fn on_output_ready(&self, token: EventToken, events: Readiness, attrs: TaskAttrs);
}

/// Thread-backed [`TaskScheduler`]: one OS thread per spawned task.
pub struct ThreadScheduler {
    handles: Mutex<HashMap<TaskId, thread::JoinHandle<()>>>,
    next_task_id: AtomicU64,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        ThreadScheduler {
            handles: Mutex::new(HashMap::new()),
            next_task_id: AtomicU64::new(1),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler for ThreadScheduler {
    fn spawn_background(
        &self,
        _attrs: TaskAttrs,
        task: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<TaskId, Error> {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name("event-dispatcher".to_string())
            .spawn(move || task())
            .map_err(Error::Io)?;
        self.handles.lock().insert(id, handle);
        Ok(id)
    }

    fn join(&self, id: TaskId) {
        let handle = self.handles.lock().remove(&id);
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(task_id = id, "dispatcher worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn attrs_compose_with_bitor() {
        let attrs = TaskAttrs::NORMAL | TaskAttrs::NEVER_QUIT | TaskAttrs::GLOBAL_PRIORITY;
        assert!(attrs.contains(TaskAttrs::NEVER_QUIT));
        assert!(attrs.contains(TaskAttrs::GLOBAL_PRIORITY));
        assert!(!TaskAttrs::NEVER_QUIT.contains(TaskAttrs::GLOBAL_PRIORITY));
    }

    #[test]
    fn thread_scheduler_spawns_and_joins() {
        let scheduler = ThreadScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();

        let id = scheduler
            .spawn_background(
                TaskAttrs::NORMAL,
                Box::new(move || ran_clone.store(true, Ordering::Release)),
            )
            .unwrap();
        assert_ne!(id, 0);

        scheduler.join(id);
        assert!(ran.load(Ordering::Acquire));

        // Joining an unknown or already-joined id is a no-op.
        scheduler.join(id);
        scheduler.join(9999);
    }
}
