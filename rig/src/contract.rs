//! Assertion bridge
//!
//! Converts assertion (contract) failures into typed faults raised on the
//! thread where the assertion tripped. The rig's worker wrapper then captures
//! them like any other fault from `run`.
//!
//! There is no process-wide hook. Each rig owns an [`AssertionBridge`] and
//! activates it on its worker threads for the duration of `run`;
//! [`report`] and [`contract_assert!`](crate::contract_assert) route through
//! whichever bridge is active on the calling thread.

use std::cell::RefCell;
use std::fmt;
use std::panic;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

/// Typed fault raised by a bridged assertion failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AssertionFailure {
    /// Human readable failure message
    pub message: String,
    /// Source text of the condition that failed
    pub condition: String,
    /// Description of the originating cause, if the assertion wrapped one
    pub cause: Option<String>,
}

impl AssertionFailure {
    pub fn new(condition: impl Into<String>, message: Option<String>, cause: Option<String>) -> Self {
        let condition = condition.into();
        let message = match message {
            Some(msg) => format!("Assertion failed: {}", msg),
            None => format!("Assertion failed: {}", condition),
        };
        Self {
            message,
            condition,
            cause,
        }
    }
}

type FailureHook = Arc<dyn Fn(&AssertionFailure) + Send + Sync>;

/// Injectable listener for assertion failures
///
/// Cloning is cheap; clones share the same side-effect callback.
#[derive(Clone, Default)]
pub struct AssertionBridge {
    hook: Option<FailureHook>,
}

impl fmt::Debug for AssertionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionBridge")
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

thread_local! {
    static ACTIVE_BRIDGE: RefCell<Option<AssertionBridge>> = const { RefCell::new(None) };
}

impl AssertionBridge {
    /// Create a bridge with no side-effect callback
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a callback invoked before each failure is raised
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AssertionFailure) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Run the side-effect callback, then raise the failure on this thread
    pub fn raise(&self, failure: AssertionFailure) -> ! {
        debug!(condition = %failure.condition, "AssertionBridge::raise");
        if let Some(hook) = &self.hook {
            hook(&failure);
        }
        panic::panic_any(failure)
    }

    /// Build an [`AssertionFailure`] and raise it through this bridge
    pub fn fail(&self, condition: &str, message: Option<String>, cause: Option<String>) -> ! {
        self.raise(AssertionFailure::new(condition, message, cause))
    }

    /// Make this bridge the active one on the current thread
    ///
    /// The previously active bridge (if any) is restored when the returned
    /// scope is dropped.
    pub fn enter(&self) -> BridgeScope {
        let previous = ACTIVE_BRIDGE.with(|active| active.borrow_mut().replace(self.clone()));
        BridgeScope { previous }
    }
}

/// Guard returned by [`AssertionBridge::enter`]
#[must_use = "the bridge is deactivated when the scope is dropped"]
pub struct BridgeScope {
    previous: Option<AssertionBridge>,
}

impl Drop for BridgeScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_BRIDGE.with(|active| *active.borrow_mut() = previous);
    }
}

/// Report an assertion failure on the current thread
///
/// Routes through the active bridge when there is one. Without a bridge the
/// same [`AssertionFailure`] payload is raised directly.
pub fn report(condition: &str, message: Option<String>) -> ! {
    let failure = AssertionFailure::new(condition, message, None);
    let bridge = ACTIVE_BRIDGE.with(|active| active.borrow().clone());
    match bridge {
        Some(bridge) => bridge.raise(failure),
        None => panic::panic_any(failure),
    }
}

/// Assert a condition, reporting failures through the active assertion bridge
///
/// ```ignore
/// contract_assert!(queue.len() <= capacity);
/// contract_assert!(seen.insert(id), "duplicate id {}", id);
/// ```
#[macro_export]
macro_rules! contract_assert {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::contract::report(stringify!($cond), None)
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::contract::report(stringify!($cond), Some(format!($($arg)+)))
        }
    };
}
