//! Containment of panics raised by application callbacks.
//!
//! Handlers, timer tasks and response listeners are user code running on
//! threads the crate owns. A panic in one of them must not take the thread
//! down, so each call goes through [`catch`], which logs the payload and
//! reports whether the callback completed.

use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// Displayable view of a panic payload.
///
/// Payloads raised with a string literal or a formatted message print as
/// that text; anything else prints a placeholder.
///
/// ```
/// use httpwire::panic::PanicMessage;
///
/// let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
/// assert_eq!(PanicMessage(payload.as_ref()).to_string(), "boom");
///
/// let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
/// assert_eq!(PanicMessage(payload.as_ref()).to_string(), "<non-string panic payload>");
/// ```
pub struct PanicMessage<'a>(pub &'a (dyn Any + Send));

impl fmt::Display for PanicMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else {
            f.write_str("<non-string panic payload>")
        }
    }
}

/// Run `f`, logging and swallowing any panic.
///
/// Returns `Some` with the closure's result, or `None` if it panicked.
pub fn catch<R>(context: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::error!(panic = %PanicMessage(payload.as_ref()), context, "callback panicked");
            crate::metrics::inc_errors("panic");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn completed_callbacks_return_their_value() {
        assert_eq!(catch("test", || 41 + 1), Some(42));
    }

    #[traced_test]
    #[test]
    fn panics_are_logged_with_context() {
        let result: Option<()> = catch("listener", || panic!("listener exploded"));
        assert!(result.is_none());
        assert!(logs_contain("listener exploded"));
        assert!(logs_contain("listener"));
    }
}
