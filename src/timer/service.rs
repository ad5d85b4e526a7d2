//! Background thread running delayed tasks.

use std::{
    io,
    sync::{Arc, Weak},
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use super::{DeadlineKey, DeadlineQueue};
use crate::panic;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
    queue: DeadlineQueue<Task>,
    running: bool,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
    idle_wait: Duration,
    thread_name: String,
}

/// Runs closures after a delay on a single lazily started thread.
///
/// The thread starts with the first scheduled task and exits after two
/// consecutive waits of `idle_wait` find the queue empty, so an idle service
/// holds no thread. Tasks run one at a time; a panicking task is logged and
/// does not stop the service.
///
/// ```
/// use std::{sync::mpsc, time::Duration};
///
/// use httpwire::timer::TimerService;
///
/// let timers = TimerService::new("doc-timer", Duration::from_secs(1));
/// let (tx, rx) = mpsc::channel();
/// timers
///     .schedule(Duration::from_millis(5), move || tx.send(()).unwrap())
///     .unwrap();
/// rx.recv_timeout(Duration::from_secs(5)).unwrap();
/// ```
#[derive(Clone)]
pub struct TimerService {
    shared: Arc<Shared>,
}

/// Handle to a scheduled task.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    key: DeadlineKey,
    shared: Weak<Shared>,
}

impl TimerHandle {
    /// Prevent the task from running. Returns `false` if it already ran or
    /// was cancelled.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        shared.state.lock().queue.remove(self.key).is_some()
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("thread_name", &self.thread_name)
            .finish_non_exhaustive()
    }
}

impl TimerService {
    /// Create a service whose worker thread is named `thread_name`.
    #[must_use]
    pub fn new(thread_name: impl Into<String>, idle_wait: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                wakeup: Condvar::new(),
                idle_wait,
                thread_name: thread_name.into(),
            }),
        }
    }

    /// Run `task` once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread could not be spawned.
    pub fn schedule(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> io::Result<TimerHandle> {
        let mut state = self.shared.state.lock();
        let key = state.queue.offer(Instant::now() + delay, Box::new(task));
        if !state.running {
            let shared = Arc::clone(&self.shared);
            if let Err(err) = thread::Builder::new()
                .name(self.shared.thread_name.clone())
                .spawn(move || run(&shared))
            {
                state.queue.remove(key);
                return Err(err);
            }
            state.running = true;
            tracing::debug!(thread = %self.shared.thread_name, "timer thread started");
        }
        drop(state);
        self.shared.wakeup.notify_one();
        Ok(TimerHandle {
            key,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize { self.shared.state.lock().queue.len() }

    /// Whether the worker thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool { self.shared.state.lock().running }
}

fn run(shared: &Shared) {
    let mut idle_rounds = 0u8;
    loop {
        let mut state = shared.state.lock();
        let Some(deadline) = state.queue.next_deadline() else {
            if idle_rounds >= 2 {
                state.running = false;
                tracing::debug!(thread = %shared.thread_name, "timer thread exiting");
                return;
            }
            shared.wakeup.wait_for(&mut state, shared.idle_wait);
            if state.queue.is_empty() {
                idle_rounds += 1;
            }
            continue;
        };
        idle_rounds = 0;
        if deadline > Instant::now() {
            shared.wakeup.wait_until(&mut state, deadline);
            continue;
        }
        let Some((_, task)) = state.queue.poll() else {
            continue;
        };
        drop(state);
        panic::catch("timer task", task);
    }
}
