//! Worker descriptors

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::fault::Fault;
use crate::latch::lock_unpoisoned;

/// Main body of a worker
pub type RunFn<C> = Box<dyn FnOnce(&C) -> eyre::Result<()> + Send + 'static>;

/// Cooperative cancellation callback, delivered at most once
pub type AbortFn<C> = Box<dyn FnOnce(&C) + Send + 'static>;

/// Stable handle to a registered worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub(crate) usize);

impl WorkerId {
    /// Position of the worker in registration order
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a single worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    Registered = 0,
    Started = 1,
    Running = 2,
    Completed = 3,
    Faulted = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Started,
            2 => WorkerState::Running,
            3 => WorkerState::Completed,
            4 => WorkerState::Faulted,
            _ => WorkerState::Registered,
        }
    }

    /// `run` has returned, one way or another
    pub fn is_finished(self) -> bool {
        matches!(self, WorkerState::Completed | WorkerState::Faulted)
    }
}

/// One registered unit of concurrent work
///
/// The registry is read-only once the rig starts; only the state word, the
/// abort slot and the thread handle change afterwards.
pub struct Worker<C> {
    name: String,
    context: Arc<C>,
    abort: Mutex<Option<AbortFn<C>>>,
    state: AtomicU8,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C> Worker<C> {
    pub(crate) fn new(name: String, context: Arc<C>, abort: AbortFn<C>) -> Self {
        Self {
            name,
            context,
            abort: Mutex::new(Some(abort)),
            state: AtomicU8::new(WorkerState::Registered as u8),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The caller-owned context shared by `run` and `abort`
    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// True while the worker's OS thread exists and has not finished
    pub fn is_running(&self) -> bool {
        lock_unpoisoned(&self.handle)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// True once the abort callback has been consumed
    pub fn abort_delivered(&self) -> bool {
        lock_unpoisoned(&self.abort).is_none()
    }

    /// Invoke the abort callback if it has not been delivered yet
    ///
    /// A panicking callback is logged and swallowed. Returns whether the
    /// callback was invoked by this call.
    pub(crate) fn deliver_abort(&self) -> bool {
        let Some(abort) = lock_unpoisoned(&self.abort).take() else {
            return false;
        };

        debug!(worker = %self.name, "Delivering abort");
        let context: &C = &self.context;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| abort(context))) {
            let fault = Fault::from_panic(payload);
            warn!(worker = %self.name, %fault, "Abort callback panicked; ignoring");
        }
        true
    }

    pub(crate) fn attach_handle(&self, handle: JoinHandle<()>) {
        *lock_unpoisoned(&self.handle) = Some(handle);
    }

    /// Join the worker's OS thread, if it still has one
    pub(crate) fn reap(&self) {
        let handle = lock_unpoisoned(&self.handle).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(worker = %self.name, "Worker thread ended with an uncaught panic");
        }
    }
}

impl<C> fmt::Debug for Worker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("abort_delivered", &self.abort_delivered())
            .finish()
    }
}
