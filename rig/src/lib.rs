//! threadrig - multithreaded test rig
//!
//! Launches a fixed set of named workers, each on its own OS thread with its
//! own context, then waits for all of them. The first fault from any worker is
//! captured and every other worker is asked to stop through its abort
//! callback. Cancellation is cooperative: the rig never kills a thread.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use threadrig::Rig;
//!
//! #[derive(Default)]
//! struct Ctx { stop: AtomicBool }
//!
//! let mut rig = Rig::new();
//! rig.register_worker(
//!     |ctx: &Ctx| { while !ctx.stop.load(Ordering::SeqCst) {} Ok(()) },
//!     |ctx| ctx.stop.store(true, Ordering::SeqCst),
//!     Ctx::default(),
//!     "spinner",
//! )?;
//! rig.register_worker(|_| Err(eyre::eyre!("boom")), |_| {}, Ctx::default(), "failing")?;
//! rig.start_threads()?;
//! rig.wait_for_threads()?;
//!
//! assert!(!rig.success());
//! assert_eq!(rig.caught_fault_origin().as_deref(), Some("failing"));
//! ```

pub mod cli;
pub mod config;
pub mod contract;
mod error;
mod fault;
mod latch;
mod rig;
pub mod scenario;
mod worker;

pub use config::RigConfig;
pub use contract::{AssertionBridge, AssertionFailure, BridgeScope};
pub use error::RigError;
pub use fault::{CaughtFault, Fault, FaultKind};
pub use rig::Rig;
pub use worker::{AbortFn, RunFn, Worker, WorkerId, WorkerState};

/// Name given to workers registered without one
pub const DEFAULT_WORKER_NAME: &str = "TestThread";
