//! The rig: worker registry, fault capture, abort broadcast and barrier
//!
//! ```text
//! register_worker* ──► start_threads ──► (workers run) ──► wait_for_threads
//!                                            │
//!                     first fault ──► capture + abort siblings (one lock)
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::config::RigConfig;
use crate::contract::AssertionBridge;
use crate::error::RigError;
use crate::fault::{CaughtFault, Fault};
use crate::latch::{CompletionGuard, CompletionLatch, lock_unpoisoned};
use crate::worker::{AbortFn, RunFn, Worker, WorkerId, WorkerState};

#[derive(Debug)]
struct Outcome {
    success: bool,
    caught: Option<Arc<CaughtFault>>,
    discarded: usize,
}

impl Default for Outcome {
    fn default() -> Self {
        Self {
            success: true,
            caught: None,
            discarded: 0,
        }
    }
}

/// State shared with worker threads once the rig starts
struct Shared<C> {
    workers: Vec<Arc<Worker<C>>>,
    outcome: Arc<Mutex<Outcome>>,
    latch: CompletionLatch,
    log_discarded: bool,
}

impl<C> Shared<C> {
    /// First fault wins. Recording it and aborting the siblings happen under
    /// the same lock, so the broadcast runs exactly once.
    fn capture(&self, index: usize, fault: Fault) {
        let origin = self.workers[index].name();
        let mut outcome = lock_unpoisoned(&self.outcome);

        if outcome.caught.is_some() {
            outcome.discarded += 1;
            if self.log_discarded {
                warn!(worker = origin, %fault, "Discarding fault; an earlier fault was already captured");
            }
            return;
        }

        error!(worker = origin, %fault, "Worker faulted; aborting other workers");
        outcome.success = false;
        outcome.caught = Some(Arc::new(CaughtFault {
            fault,
            origin: origin.to_string(),
        }));
        self.broadcast_abort(index);
    }

    fn broadcast_abort(&self, faulting: usize) {
        let mut delivered = 0usize;
        for (index, worker) in self.workers.iter().enumerate() {
            // Never spawned, nothing to abort
            if index == faulting || worker.state() == WorkerState::Registered {
                continue;
            }
            if worker.deliver_abort() {
                delivered += 1;
            }
        }
        debug!(faulting, delivered, "Abort broadcast complete");
    }
}

/// Wrapped execution of one worker, run on that worker's own thread
fn run_worker<C>(shared: Arc<Shared<C>>, index: usize, run: RunFn<C>, bridge: AssertionBridge) {
    let _done = CompletionGuard::new(&shared.latch, index);
    let worker = &shared.workers[index];
    worker.set_state(WorkerState::Running);
    debug!(worker = worker.name(), "Worker running");

    let result = {
        let _bridge = bridge.enter();
        let context: &C = worker.context();
        panic::catch_unwind(AssertUnwindSafe(|| run(context)))
    };

    let fault = match result {
        Ok(Ok(())) => None,
        Ok(Err(report)) => Some(Fault::Error(report)),
        Err(payload) => Some(Fault::from_panic(payload)),
    };

    match fault {
        None => {
            worker.set_state(WorkerState::Completed);
            debug!(worker = worker.name(), "Worker completed");
        }
        Some(fault) => {
            worker.set_state(WorkerState::Faulted);
            shared.capture(index, fault);
        }
    }
}

/// Multithreaded test rig
///
/// Runs a fixed set of named workers, each on its own OS thread with its own
/// context. The first fault from any worker is captured and every other
/// worker's abort callback is invoked once; later faults are logged and
/// dropped. [`Rig::wait_for_threads`] blocks until all workers have finished.
///
/// Cancellation is cooperative only. A worker that never checks its context
/// keeps the barrier waiting.
pub struct Rig<C> {
    config: RigConfig,
    bridge: AssertionBridge,
    workers: Vec<Arc<Worker<C>>>,
    runs: Vec<RunFn<C>>,
    outcome: Arc<Mutex<Outcome>>,
    shared: Option<Arc<Shared<C>>>,
}

impl<C: Send + Sync + 'static> Default for Rig<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + Sync + 'static> Rig<C> {
    pub fn new() -> Self {
        Self::with_config(RigConfig::default())
    }

    pub fn with_config(config: RigConfig) -> Self {
        Self::with_bridge(config, AssertionBridge::default())
    }

    /// Create a rig whose workers report assertion failures through `bridge`
    pub fn with_bridge(config: RigConfig, bridge: AssertionBridge) -> Self {
        Self {
            config,
            bridge,
            workers: Vec::new(),
            runs: Vec::new(),
            outcome: Arc::new(Mutex::new(Outcome::default())),
            shared: None,
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn bridge(&self) -> &AssertionBridge {
        &self.bridge
    }

    /// Register a worker under the configured default name
    pub fn register<R, A>(&mut self, run: R, abort: A, context: impl Into<Arc<C>>) -> Result<WorkerId, RigError>
    where
        R: FnOnce(&C) -> eyre::Result<()> + Send + 'static,
        A: FnOnce(&C) + Send + 'static,
    {
        let name = self.config.default_worker_name.clone();
        self.register_worker(run, abort, context, name)
    }

    /// Register a named worker
    ///
    /// `abort` is called at most once, from another worker's thread, and only
    /// if some other worker faults. It must not block.
    pub fn register_worker<R, A>(
        &mut self,
        run: R,
        abort: A,
        context: impl Into<Arc<C>>,
        name: impl Into<String>,
    ) -> Result<WorkerId, RigError>
    where
        R: FnOnce(&C) -> eyre::Result<()> + Send + 'static,
        A: FnOnce(&C) + Send + 'static,
    {
        if self.shared.is_some() {
            return Err(RigError::AlreadyStarted);
        }

        let id = WorkerId(self.workers.len());
        let name = name.into();
        if self.config.thread_name(&name).contains('\0') {
            return Err(RigError::InvalidName { name });
        }
        debug!(%id, %name, "Registering worker");

        let abort: AbortFn<C> = Box::new(abort);
        self.workers.push(Arc::new(Worker::new(name, context.into(), abort)));
        self.runs.push(Box::new(run));
        Ok(id)
    }

    /// Spawn every registered worker; does not block
    pub fn start_threads(&mut self) -> Result<(), RigError> {
        if self.shared.is_some() {
            return Err(RigError::AlreadyStarted);
        }

        let count = self.workers.len();
        let shared = Arc::new(Shared {
            workers: self.workers.clone(),
            outcome: self.outcome.clone(),
            latch: CompletionLatch::new(count),
            log_discarded: self.config.log_discarded_faults,
        });
        self.shared = Some(shared.clone());
        info!(workers = count, "Starting worker threads");

        let runs = std::mem::take(&mut self.runs);
        for (index, run) in runs.into_iter().enumerate() {
            let worker = &self.workers[index];
            let mut builder = thread::Builder::new().name(self.config.thread_name(worker.name()));
            if let Some(stack_size) = self.config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            worker.set_state(WorkerState::Started);
            let thread_shared = shared.clone();
            let bridge = self.bridge.clone();
            match builder.spawn(move || run_worker(thread_shared, index, run, bridge)) {
                Ok(handle) => worker.attach_handle(handle),
                Err(source) => {
                    worker.set_state(WorkerState::Faulted);
                    shared.capture(index, Fault::Spawn(source.to_string()));
                    // Unspawned workers will never signal on their own
                    for unspawned in index..count {
                        shared.latch.signal(unspawned);
                    }
                    return Err(RigError::Spawn {
                        name: worker.name().to_string(),
                        source,
                    });
                }
            }
        }

        Ok(())
    }

    /// Block until every worker has signaled completion
    ///
    /// Worker faults do not surface here; inspect [`Rig::success`] and
    /// [`Rig::caught_fault`] afterwards. Calling this again after it returned
    /// is a no-op.
    pub fn wait_for_threads(&self) -> Result<(), RigError> {
        let shared = self.shared.as_ref().ok_or(RigError::NotStarted)?;
        shared.latch.wait();

        if self.config.reap_on_wait {
            for worker in &self.workers {
                worker.reap();
            }
        }

        let outcome = lock_unpoisoned(&self.outcome);
        info!(
            workers = self.workers.len(),
            success = outcome.success,
            discarded = outcome.discarded,
            "All workers finished"
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.is_some()
    }

    /// Started and every completion signal received
    pub fn is_settled(&self) -> bool {
        self.shared.as_ref().is_some_and(|shared| shared.latch.remaining() == 0)
    }

    /// Workers that have not signaled completion yet
    pub fn pending_count(&self) -> usize {
        match &self.shared {
            Some(shared) => shared.latch.remaining(),
            None => self.workers.len(),
        }
    }

    pub fn completed_count(&self) -> usize {
        self.workers.len() - self.pending_count()
    }

    /// Whether a specific worker has signaled completion
    pub fn is_signaled(&self, id: WorkerId) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|shared| shared.latch.is_signaled(id.index()))
    }

    /// Registered workers, in registration order
    pub fn workers(&self) -> &[Arc<Worker<C>>] {
        &self.workers
    }

    pub fn worker(&self, id: WorkerId) -> Result<&Arc<Worker<C>>, RigError> {
        self.workers
            .get(id.index())
            .ok_or(RigError::UnknownWorker { id: id.index() })
    }

    /// False once any worker has faulted
    pub fn success(&self) -> bool {
        lock_unpoisoned(&self.outcome).success
    }

    /// The first fault captured, if any
    pub fn caught_fault(&self) -> Option<Arc<CaughtFault>> {
        lock_unpoisoned(&self.outcome).caught.clone()
    }

    /// Name of the worker that produced the captured fault
    pub fn caught_fault_origin(&self) -> Option<String> {
        self.caught_fault().map(|caught| caught.origin.clone())
    }

    /// Faults that lost the first-fault race and were dropped
    pub fn discarded_faults(&self) -> usize {
        lock_unpoisoned(&self.outcome).discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Ctx {
        cancelled: AtomicBool,
        aborts: AtomicUsize,
    }

    fn cancel(ctx: &Ctx) {
        ctx.cancelled.store(true, Ordering::SeqCst);
        ctx.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn spin_until_cancelled(ctx: &Ctx) -> eyre::Result<()> {
        while !ctx.cancelled.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    #[test]
    fn test_empty_rig_settles_immediately() {
        let mut rig: Rig<Ctx> = Rig::new();
        rig.start_threads().unwrap();
        rig.wait_for_threads().unwrap();

        assert!(rig.success());
        assert!(rig.is_settled());
        assert_eq!(rig.completed_count(), 0);
    }

    #[test]
    fn test_default_name_comes_from_config() {
        let config = RigConfig {
            default_worker_name: "Probe".to_string(),
            ..Default::default()
        };
        let mut rig: Rig<Ctx> = Rig::with_config(config);
        let id = rig.register(|_| Ok(()), |_| {}, Ctx::default()).unwrap();

        assert_eq!(rig.worker(id).unwrap().name(), "Probe");
        assert_eq!(rig.worker(id).unwrap().state(), WorkerState::Registered);
    }

    #[test]
    fn test_lifecycle_misuse_is_rejected() {
        let mut rig: Rig<Ctx> = Rig::new();
        assert!(matches!(rig.wait_for_threads(), Err(RigError::NotStarted)));

        rig.start_threads().unwrap();
        assert!(matches!(rig.start_threads(), Err(RigError::AlreadyStarted)));
        assert!(matches!(
            rig.register(|_| Ok(()), |_| {}, Ctx::default()),
            Err(RigError::AlreadyStarted)
        ));
        assert!(matches!(rig.worker(WorkerId(3)), Err(RigError::UnknownWorker { id: 3 })));
        rig.wait_for_threads().unwrap();
    }

    #[test]
    fn test_error_return_is_captured_and_siblings_aborted() {
        let mut rig = Rig::new();
        let spinner = rig
            .register_worker(spin_until_cancelled, cancel, Ctx::default(), "spinner")
            .unwrap();
        let failing = rig
            .register_worker(|_| Err(eyre::eyre!("bad input")), cancel, Ctx::default(), "failing")
            .unwrap();

        rig.start_threads().unwrap();
        rig.wait_for_threads().unwrap();

        assert!(!rig.success());
        let caught = rig.caught_fault().unwrap();
        assert_eq!(caught.fault.kind(), FaultKind::Error);
        assert_eq!(caught.message(), "bad input");
        assert_eq!(rig.caught_fault_origin().as_deref(), Some("failing"));

        let spinner = rig.worker(spinner).unwrap();
        assert_eq!(spinner.state(), WorkerState::Completed);
        assert_eq!(spinner.context().aborts.load(Ordering::SeqCst), 1);

        let failing = rig.worker(failing).unwrap();
        assert_eq!(failing.state(), WorkerState::Faulted);
        assert!(!failing.abort_delivered());
        assert_eq!(failing.context().aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_is_captured() {
        let mut rig = Rig::new();
        rig.register_worker(|_: &Ctx| panic!("worker blew up"), cancel, Ctx::default(), "panicky")
            .unwrap();

        rig.start_threads().unwrap();
        rig.wait_for_threads().unwrap();

        let caught = rig.caught_fault().unwrap();
        assert_eq!(caught.fault.kind(), FaultKind::Panic);
        assert_eq!(caught.message(), "worker blew up");
    }

    #[test]
    fn test_panicking_abort_does_not_hang_barrier() {
        let mut rig = Rig::new();
        rig.register_worker(
            |_| Ok(()),
            |_: &Ctx| panic!("abort exploded"),
            Ctx::default(),
            "bad-abort",
        )
        .unwrap();
        rig.register_worker(|_| Err(eyre::eyre!("first")), cancel, Ctx::default(), "failing")
            .unwrap();

        rig.start_threads().unwrap();
        rig.wait_for_threads().unwrap();

        assert_eq!(rig.caught_fault_origin().as_deref(), Some("failing"));
        assert!(rig.workers()[0].abort_delivered());
        assert!(rig.is_settled());
    }

    #[test]
    fn test_nul_in_name_is_rejected_at_registration() {
        let mut rig: Rig<Ctx> = Rig::new();
        rig.register_worker(|_| Ok(()), |_| {}, Ctx::default(), "ok").unwrap();

        let err = rig
            .register_worker(|_| Ok(()), |_| {}, Ctx::default(), "bad\0name")
            .unwrap_err();
        assert!(matches!(err, RigError::InvalidName { ref name } if name == "bad\0name"));
        assert_eq!(rig.workers().len(), 1);

        rig.start_threads().unwrap();
        rig.wait_for_threads().unwrap();
        assert!(rig.success());
    }

    #[test]
    fn test_nul_in_prefix_is_rejected_at_registration() {
        let config = RigConfig {
            thread_name_prefix: Some("r\0g".to_string()),
            ..Default::default()
        };
        let mut rig: Rig<Ctx> = Rig::with_config(config);
        assert!(matches!(
            rig.register(|_| Ok(()), |_| {}, Ctx::default()),
            Err(RigError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_spawn_failure_is_captured_and_barrier_released() {
        // No OS will hand out a 64 TiB stack
        let config = RigConfig {
            stack_size: Some(1 << 46),
            ..Default::default()
        };
        let mut rig: Rig<Ctx> = Rig::with_config(config);
        let first = rig.register_worker(|_| Ok(()), cancel, Ctx::default(), "a").unwrap();
        let second = rig.register_worker(|_| Ok(()), cancel, Ctx::default(), "b").unwrap();

        let err = rig.start_threads().unwrap_err();
        assert!(matches!(err, RigError::Spawn { ref name, .. } if name == "a"));

        rig.wait_for_threads().unwrap();
        assert!(rig.is_settled());
        assert!(!rig.success());

        let caught = rig.caught_fault().unwrap();
        assert_eq!(caught.fault.kind(), FaultKind::Spawn);
        assert_eq!(caught.origin, "a");
        assert_eq!(rig.worker(first).unwrap().state(), WorkerState::Faulted);

        // The unspawned worker is never aborted
        let second = rig.worker(second).unwrap();
        assert_eq!(second.state(), WorkerState::Registered);
        assert!(!second.abort_delivered());
        assert_eq!(second.context().aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_thread_names_use_prefix() {
        let config = RigConfig {
            thread_name_prefix: Some("rig".to_string()),
            ..Default::default()
        };
        let mut rig = Rig::with_config(config);
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        rig.register_worker(
            move |_: &Ctx| {
                *slot.lock().unwrap() = thread::current().name().map(str::to_string);
                Ok(())
            },
            |_| {},
            Ctx::default(),
            "reader",
        )
        .unwrap();

        rig.start_threads().unwrap();
        rig.wait_for_threads().unwrap();

        assert_eq!(seen.lock().unwrap().as_deref(), Some("rig-reader"));
    }

    #[test]
    fn test_reap_disabled_still_waits_for_signals() {
        let config = RigConfig {
            reap_on_wait: false,
            ..Default::default()
        };
        let mut rig: Rig<Ctx> = Rig::with_config(config);
        let id = rig.register(|_| Ok(()), |_| {}, Ctx::default()).unwrap();

        rig.start_threads().unwrap();
        rig.wait_for_threads().unwrap();

        assert!(rig.is_signaled(id));
        assert_eq!(rig.worker(id).unwrap().state(), WorkerState::Completed);
    }
}
