//! Fail-fast: immediate, non-recoverable termination on broken invariants.
//!
//! Dispatch reaching a state that a well-formed program cannot produce
//! (a compiled call site naming a method that does not exist) is a
//! loader or compiler defect. It is reported here and control never
//! returns to the caller.
//!
//! The default handler aborts the process. Test harnesses install
//! [`panicking_handler`] so the condition becomes an observable panic.

use parking_lot::RwLock;
use std::fmt;

/// Why the runtime is failing fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FailFastReason {
    /// Internal consistency violation.
    InternalError,
}

impl fmt::Display for FailFastReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailFastReason::InternalError => f.write_str("InternalError"),
        }
    }
}

/// Process-wide fail-fast handler. Must not return.
pub type FailFastHandler = fn(FailFastReason, &str) -> !;

static HANDLER: RwLock<FailFastHandler> = RwLock::new(aborting_handler);

fn aborting_handler(reason: FailFastReason, message: &str) -> ! {
    eprintln!("Process terminated. {}: {}", reason, message);
    std::process::abort()
}

/// Handler that panics instead of aborting.
pub fn panicking_handler(reason: FailFastReason, message: &str) -> ! {
    panic!("fail-fast ({}): {}", reason, message)
}

/// Install a fail-fast handler, returning the previous one.
pub fn set_fail_fast_handler(handler: FailFastHandler) -> FailFastHandler {
    std::mem::replace(&mut *HANDLER.write(), handler)
}

/// Report an unrecoverable condition and terminate.
#[cold]
#[inline(never)]
pub fn fail_fast(reason: FailFastReason, message: &str) -> ! {
    tracing::error!(%reason, message, "fail-fast");
    let handler = *HANDLER.read();
    handler(reason, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        assert_eq!(FailFastReason::InternalError.to_string(), "InternalError");
    }

    #[test]
    #[should_panic(expected = "fail-fast (InternalError): broken")]
    fn test_panicking_handler_panics_with_reason() {
        set_fail_fast_handler(panicking_handler);
        fail_fast(FailFastReason::InternalError, "broken");
    }
}
