//! Worker fault types
//!
//! A fault is anything that ends a worker's `run` abnormally: an `Err` return,
//! a panic, or a bridged assertion failure. Only the first one is kept.

use std::any::Any;
use std::fmt;

use crate::contract::AssertionFailure;

/// Coarse classification of a [`Fault`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Error,
    Panic,
    Assertion,
    Spawn,
}

/// Abnormal termination of a worker
#[derive(Debug)]
pub enum Fault {
    /// `run` returned an error
    Error(eyre::Report),
    /// `run` panicked with an ordinary payload
    Panic(String),
    /// `run` tripped a bridged assertion
    Assertion(AssertionFailure),
    /// The worker's thread could not be created
    Spawn(String),
}

impl Fault {
    /// Convert a caught panic payload into a fault
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        let payload = match payload.downcast::<AssertionFailure>() {
            Ok(failure) => return Fault::Assertion(*failure),
            Err(other) => other,
        };
        Fault::Panic(panic_message(&*payload))
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::Error(_) => FaultKind::Error,
            Fault::Panic(_) => FaultKind::Panic,
            Fault::Assertion(_) => FaultKind::Assertion,
            Fault::Spawn(_) => FaultKind::Spawn,
        }
    }

    /// Top-level message, without any wrapped causes
    pub fn message(&self) -> String {
        match self {
            Fault::Error(report) => report.to_string(),
            Fault::Panic(msg) | Fault::Spawn(msg) => msg.clone(),
            Fault::Assertion(failure) => failure.message.clone(),
        }
    }

    /// The bridged assertion, if this fault came from one
    pub fn assertion(&self) -> Option<&AssertionFailure> {
        match self {
            Fault::Assertion(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // {:#} on a report prints the whole cause chain
            Fault::Error(report) if f.alternate() => write!(f, "{:#}", report),
            Fault::Error(report) => write!(f, "{}", report),
            Fault::Panic(msg) => write!(f, "panicked: {}", msg),
            Fault::Assertion(failure) => write!(f, "{}", failure),
            Fault::Spawn(msg) => write!(f, "spawn failed: {}", msg),
        }
    }
}

/// The first fault observed by a rig, with the name of the worker it came from
#[derive(Debug)]
pub struct CaughtFault {
    pub fault: Fault,
    pub origin: String,
}

impl CaughtFault {
    pub fn message(&self) -> String {
        self.fault.message()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;
    use std::panic;

    fn caught<F: FnOnce()>(f: F) -> Box<dyn Any + Send + 'static> {
        panic::catch_unwind(panic::AssertUnwindSafe(f)).expect_err("closure should panic")
    }

    #[test]
    fn test_from_panic_str_and_string() {
        let fault = Fault::from_panic(caught(|| panic!("plain")));
        assert_eq!(fault.kind(), FaultKind::Panic);
        assert_eq!(fault.message(), "plain");

        let n = 42;
        let fault = Fault::from_panic(caught(|| panic!("formatted {}", n)));
        assert_eq!(fault.message(), "formatted 42");
    }

    #[test]
    fn test_from_panic_opaque_payload() {
        let fault = Fault::from_panic(caught(|| panic::panic_any(17u32)));
        assert_eq!(fault.message(), "non-string panic payload");
    }

    #[test]
    fn test_from_panic_recognizes_assertion() {
        let failure = AssertionFailure::new("ok", None, None);
        let fault = Fault::from_panic(caught(move || panic::panic_any(failure)));
        assert_eq!(fault.kind(), FaultKind::Assertion);
        assert_eq!(fault.assertion().map(|a| a.condition.as_str()), Some("ok"));
    }

    #[test]
    fn test_error_message_is_outermost_context() {
        let inner: eyre::Result<()> = Err(eyre::eyre!("disk full"));
        let report = inner.wrap_err("flush failed").unwrap_err();
        let fault = Fault::Error(report);

        assert_eq!(fault.message(), "flush failed");
        assert_eq!(format!("{:#}", fault), "flush failed: disk full");
    }
}
