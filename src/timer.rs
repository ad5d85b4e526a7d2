//! Deadline tracking.
//!
//! [`DeadlineQueue`] is the plain data structure the reactors poll on each
//! sweep to expire idle connections and timed-out requests.
//! [`TimerService`] wraps one in a background thread for callers that need
//! delayed callbacks outside a reactor loop.

mod queue;
mod service;

pub use queue::{DeadlineKey, DeadlineQueue};
pub use service::{TimerHandle, TimerService};
