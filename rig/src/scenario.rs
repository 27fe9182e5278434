//! Canned rig scenarios
//!
//! Each scenario builds a rig, runs it to completion and checks the observed
//! outcome against what the scenario expects. The `rig` binary runs these as a
//! self-check of the harness on the current machine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use eyre::eyre;
use tracing::info;

use crate::config::RigConfig;
use crate::contract::AssertionBridge;
use crate::contract_assert;
use crate::error::RigError;
use crate::fault::FaultKind;
use crate::rig::Rig;

/// Message raised by the failing worker in the fault scenarios
pub const FAULT_MESSAGE: &str = "Exception message";

/// Name of the failing worker in the fault scenarios
pub const FAULTED_WORKER: &str = "Faulted thread";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-worker context with a cooperative cancellation flag
#[derive(Debug, Default)]
pub struct ScenarioContext {
    cancelled: AtomicBool,
    aborts: AtomicUsize,
}

impl ScenarioContext {
    pub fn cancel(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// How many times `cancel` was called
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Loop until cancelled
    pub fn spin(&self) -> eyre::Result<()> {
        while !self.is_cancelled() {
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }
}

/// Observed outcome of a scenario, plus any expectation it missed
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub success: bool,
    pub fault: Option<String>,
    pub fault_kind: Option<FaultKind>,
    pub origin: Option<String>,
    pub elapsed: Duration,
    /// Workers whose cancellation flag was set
    pub aborted: usize,
    pub discarded: usize,
    pub problems: Vec<String>,
}

impl ScenarioReport {
    fn observe(name: &'static str, rig: &Rig<ScenarioContext>, elapsed: Duration) -> Self {
        let caught = rig.caught_fault();
        let mut report = Self {
            name,
            success: rig.success(),
            fault: caught.as_ref().map(|c| c.message()),
            fault_kind: caught.as_ref().map(|c| c.fault.kind()),
            origin: caught.as_ref().map(|c| c.origin.clone()),
            elapsed,
            aborted: rig
                .workers()
                .iter()
                .filter(|worker| worker.context().is_cancelled())
                .count(),
            discarded: rig.discarded_faults(),
            problems: Vec::new(),
        };

        if rig.workers().iter().any(|worker| worker.is_running()) && rig.config().reap_on_wait {
            report.problems.push("a worker thread is still running after the barrier".to_string());
        }
        report
    }

    fn expect(&mut self, ok: bool, problem: impl FnOnce() -> String) {
        if !ok {
            self.problems.push(problem());
        }
    }

    fn expect_fault(&mut self, message: &str, origin: &str) {
        self.expect(!self.success, || "rig reported success".to_string());
        let fault = self.fault.clone();
        self.expect(fault.as_deref() == Some(message), || {
            format!("expected fault {:?}, got {:?}", message, fault)
        });
        let seen = self.origin.clone();
        self.expect(seen.as_deref() == Some(origin), || {
            format!("expected origin {:?}, got {:?}", origin, seen)
        });
    }

    pub fn passed(&self) -> bool {
        self.problems.is_empty()
    }
}

fn run_to_completion(rig: &mut Rig<ScenarioContext>) -> Result<Duration, RigError> {
    let started = Instant::now();
    rig.start_threads()?;
    rig.wait_for_threads()?;
    Ok(started.elapsed())
}

/// Workers sleep `step * i` for `i` in `0..workers`, plus one no-op worker
pub fn staggered_sleep(config: &RigConfig, workers: usize, step: Duration) -> Result<ScenarioReport, RigError> {
    let mut rig = Rig::with_config(config.clone());
    for i in 0..workers {
        let nap = step * i as u32;
        rig.register(
            move |_| {
                thread::sleep(nap);
                Ok(())
            },
            ScenarioContext::cancel,
            ScenarioContext::default(),
        )?;
    }
    rig.register(|_| Ok(()), |_| {}, ScenarioContext::default())?;

    let elapsed = run_to_completion(&mut rig)?;
    let longest = step * workers.saturating_sub(1) as u32;

    let mut report = ScenarioReport::observe("sleep", &rig, elapsed);
    report.expect(report.success, || "rig reported a fault".to_string());
    report.expect(elapsed >= longest, || {
        format!("barrier released after {:?}, before {:?}", elapsed, longest)
    });
    info!(workers, ?elapsed, "staggered_sleep finished");
    Ok(report)
}

/// A spinning worker plus one that fails after `delay`
pub fn single_fault(config: &RigConfig, delay: Duration) -> Result<ScenarioReport, RigError> {
    let mut rig = Rig::with_config(config.clone());
    rig.register(ScenarioContext::spin, ScenarioContext::cancel, ScenarioContext::default())?;
    rig.register_worker(
        move |_| {
            thread::sleep(delay);
            Err(eyre!(FAULT_MESSAGE))
        },
        |_| {},
        ScenarioContext::default(),
        FAULTED_WORKER,
    )?;

    let elapsed = run_to_completion(&mut rig)?;

    let mut report = ScenarioReport::observe("fault", &rig, elapsed);
    report.expect_fault(FAULT_MESSAGE, FAULTED_WORKER);
    report.expect(rig.workers()[0].context().is_cancelled(), || {
        "spinning worker was not cancelled".to_string()
    });
    report.expect(elapsed >= delay, || format!("barrier released after {:?}", elapsed));
    Ok(report)
}

/// Combine sub-operation failures into one error
pub fn aggregate_errors(errors: Vec<eyre::Report>) -> eyre::Report {
    let detail: Vec<String> = errors.iter().map(|err| format!("({})", err)).collect();
    eyre!("One or more errors occurred. {}", detail.join(" "))
}

/// Like [`single_fault`], but the failure comes from a sub-thread the worker
/// polls, and the worker re-raises it as an aggregate
pub fn wrapped_fault(config: &RigConfig, delay: Duration) -> Result<ScenarioReport, RigError> {
    let mut rig = Rig::with_config(config.clone());
    rig.register(ScenarioContext::spin, ScenarioContext::cancel, ScenarioContext::default())?;
    rig.register_worker(
        move |_| {
            let sub = thread::spawn(move || -> eyre::Result<()> {
                thread::sleep(delay);
                Err(eyre!(FAULT_MESSAGE))
            });

            while !sub.is_finished() {
                thread::sleep(POLL_INTERVAL);
            }
            match sub.join() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(aggregate_errors(vec![err])),
                Err(_) => Err(aggregate_errors(vec![eyre!("sub-operation panicked")])),
            }
        },
        |_| {},
        ScenarioContext::default(),
        FAULTED_WORKER,
    )?;

    let elapsed = run_to_completion(&mut rig)?;

    let expected = format!("One or more errors occurred. ({})", FAULT_MESSAGE);
    let mut report = ScenarioReport::observe("wrapped", &rig, elapsed);
    report.expect_fault(&expected, FAULTED_WORKER);
    report.expect(elapsed >= delay, || format!("barrier released after {:?}", elapsed));
    Ok(report)
}

/// A worker trips a bridged assertion; the bridge callback must fire once
pub fn contract_failure(config: &RigConfig) -> Result<ScenarioReport, RigError> {
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let seen = hook_calls.clone();
    let bridge = AssertionBridge::new().on_failure(move |failure| {
        info!(condition = %failure.condition, "contract failure observed");
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let mut rig = Rig::with_bridge(config.clone(), bridge);
    rig.register(
        |ctx: &ScenarioContext| {
            let ready = ctx.is_cancelled();
            contract_assert!(ready, "Contract failed");
            Ok(())
        },
        ScenarioContext::cancel,
        ScenarioContext::default(),
    )?;

    let elapsed = run_to_completion(&mut rig)?;

    let mut report = ScenarioReport::observe("contract", &rig, elapsed);
    report.expect(!report.success, || "rig reported success".to_string());
    let kind = report.fault_kind;
    report.expect(kind == Some(FaultKind::Assertion), || {
        format!("expected an assertion fault, got {:?}", kind)
    });
    let calls = hook_calls.load(Ordering::SeqCst);
    report.expect(calls == 1, || format!("bridge callback ran {} times", calls));
    Ok(report)
}

/// Every worker fails at the same moment; exactly one fault may survive
pub fn fault_storm(config: &RigConfig, workers: usize) -> Result<ScenarioReport, RigError> {
    let gate = Arc::new(Barrier::new(workers));
    let mut rig = Rig::with_config(config.clone());
    for i in 0..workers {
        let gate = gate.clone();
        rig.register_worker(
            move |_| {
                gate.wait();
                Err(eyre!("storm fault {}", i))
            },
            ScenarioContext::cancel,
            ScenarioContext::default(),
            format!("storm-{}", i),
        )?;
    }

    let elapsed = run_to_completion(&mut rig)?;

    let mut report = ScenarioReport::observe("storm", &rig, elapsed);
    report.expect(workers == 0 || !report.success, || "rig reported success".to_string());

    let expected_discards = workers.saturating_sub(1);
    let discarded = report.discarded;
    report.expect(discarded == expected_discards, || {
        format!("expected {} discarded faults, got {}", expected_discards, discarded)
    });

    let over_aborted: Vec<String> = rig
        .workers()
        .iter()
        .filter(|worker| worker.context().abort_count() > 1)
        .map(|worker| worker.name().to_string())
        .collect();
    report.expect(over_aborted.is_empty(), || {
        format!("abort delivered more than once to {}", over_aborted.join(", "))
    });

    let aborted = report.aborted;
    report.expect(aborted == expected_discards, || {
        format!("expected {} aborted workers, got {}", expected_discards, aborted)
    });
    Ok(report)
}

/// Run every scenario with default parameters
pub fn run_all(config: &RigConfig) -> Result<Vec<ScenarioReport>, RigError> {
    Ok(vec![
        staggered_sleep(config, 4, Duration::from_millis(250))?,
        single_fault(config, Duration::from_millis(500))?,
        wrapped_fault(config, Duration::from_millis(500))?,
        contract_failure(config)?,
        fault_storm(config, 8)?,
    ])
}
