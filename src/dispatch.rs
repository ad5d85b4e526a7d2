//! Bounded worker pool between the reactor and application code.
//!
//! The reactor thread must never block, so work is offered with a
//! non-blocking send into a bounded queue. When the queue is full the task is
//! handed back through [`Task::reject`] on the submitting thread, letting the
//! server answer `503` immediately.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{metrics, panic};

/// Why a task was not queued.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Every worker is busy and the queue is full.
    #[error("work queue is full")]
    Overloaded,
    /// The pool is shutting down.
    #[error("dispatcher is shut down")]
    ShutDown,
}

/// Unit of work run on a pool thread.
pub trait Task: Send + 'static {
    /// Execute on a worker thread.
    fn run(self: Box<Self>);

    /// Called on the submitting thread when the task cannot be queued.
    fn reject(self: Box<Self>, reason: DispatchError) { let _ = reason; }
}

impl<F> Task for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) { (*self)() }
}

enum Work {
    Run(Box<dyn Task>),
    Stop,
}

struct Shared {
    tx: Sender<Work>,
    closed: AtomicBool,
}

/// Cloneable submission side of a [`Dispatcher`].
#[derive(Clone)]
pub struct DispatchHandle {
    shared: Arc<Shared>,
}

impl DispatchHandle {
    /// Queue `task` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Overloaded`] when the queue is full and
    /// [`DispatchError::ShutDown`] after shutdown began. In both cases the
    /// task's [`Task::reject`] has already run.
    pub fn submit(&self, task: impl Task) -> Result<(), DispatchError> {
        let task: Box<dyn Task> = Box::new(task);
        if self.shared.closed.load(Ordering::Acquire) {
            task.reject(DispatchError::ShutDown);
            return Err(DispatchError::ShutDown);
        }
        let (work, reason) = match self.shared.tx.try_send(Work::Run(task)) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(work)) => {
                metrics::inc_dispatch_rejected();
                tracing::warn!("work queue full, rejecting task");
                (work, DispatchError::Overloaded)
            }
            Err(TrySendError::Disconnected(work)) => (work, DispatchError::ShutDown),
        };
        if let Work::Run(task) = work {
            task.reject(reason);
        }
        Err(reason)
    }

    /// Whether [`Dispatcher::shutdown`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.shared.closed.load(Ordering::Acquire) }
}

/// Fixed-size pool of named worker threads fed by a bounded queue.
///
/// ```
/// use std::time::Duration;
///
/// use crossbeam_channel::bounded;
/// use httpwire::dispatch::Dispatcher;
///
/// let pool = Dispatcher::new(2, 8, "doc-worker").unwrap();
/// let (tx, rx) = bounded(1);
/// pool.handle().submit(move || tx.send(21 * 2).unwrap()).unwrap();
/// assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
/// assert!(pool.shutdown(Duration::from_secs(5)));
/// ```
pub struct Dispatcher {
    handle: DispatchHandle,
    workers: Vec<JoinHandle<()>>,
    done: Receiver<()>,
    stopped: bool,
}

impl Dispatcher {
    /// Start `workers` threads named `<prefix>-<n>` behind a queue holding
    /// up to `queue_size` tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn new(workers: usize, queue_size: usize, thread_prefix: &str) -> io::Result<Self> {
        let (tx, rx) = bounded(queue_size.max(1));
        let (done_tx, done) = bounded(workers.max(1));
        let mut dispatcher = Self {
            handle: DispatchHandle {
                shared: Arc::new(Shared {
                    tx,
                    closed: AtomicBool::new(false),
                }),
            },
            workers: Vec::with_capacity(workers.max(1)),
            done,
            stopped: false,
        };
        for n in 0..workers.max(1) {
            let rx = rx.clone();
            let done_tx = done_tx.clone();
            let worker = thread::Builder::new()
                .name(format!("{thread_prefix}-{n}"))
                .spawn(move || worker_loop(&rx, &done_tx))?;
            dispatcher.workers.push(worker);
        }
        Ok(dispatcher)
    }

    /// Submission handle for other threads.
    #[must_use]
    pub fn handle(&self) -> DispatchHandle { self.handle.clone() }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize { self.workers.len() }

    /// Stop accepting work, let queued tasks finish and wait up to `timeout`
    /// for the workers to exit.
    ///
    /// Returns `false` if some workers were still busy at the deadline; they
    /// are detached and finish in the background.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        self.stopped = true;
        self.handle.shared.closed.store(true, Ordering::Release);
        let deadline = Instant::now() + timeout;
        let total = self.workers.len();

        for _ in 0..total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.handle.shared.tx.send_timeout(Work::Stop, remaining).is_err() {
                break;
            }
        }

        let mut finished = 0;
        while finished < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.done.recv_timeout(remaining).is_err() {
                break;
            }
            finished += 1;
        }

        if finished < total {
            tracing::warn!(
                busy = total - finished,
                "workers still running at shutdown deadline; detaching"
            );
            return false;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("worker thread exited abnormally");
            }
        }
        true
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        self.handle.shared.closed.store(true, Ordering::Release);
        for _ in 0..self.workers.len() {
            if self.handle.shared.tx.try_send(Work::Stop).is_err() {
                break;
            }
        }
    }
}

fn worker_loop(rx: &Receiver<Work>, done: &Sender<()>) {
    while let Ok(work) = rx.recv() {
        match work {
            Work::Run(task) => {
                panic::catch("dispatched task", || task.run());
            }
            Work::Stop => break,
        }
    }
    let _ = done.send(());
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct SerialState {
    jobs: VecDeque<Job>,
    scheduled: bool,
}

/// Runs submitted jobs one at a time, in submission order, on the pool.
///
/// Used for WebSocket connections so messages from one peer reach the
/// handler in the order they arrived while different connections still run
/// in parallel. At most one drain task per queue is ever in the pool.
#[derive(Clone)]
pub struct SerialQueue {
    dispatcher: DispatchHandle,
    state: Arc<Mutex<SerialState>>,
}

impl SerialQueue {
    #[must_use]
    pub fn new(dispatcher: DispatchHandle) -> Self {
        Self {
            dispatcher,
            state: Arc::new(Mutex::new(SerialState {
                jobs: VecDeque::new(),
                scheduled: false,
            })),
        }
    }

    /// Append `job` and make sure a drain task is scheduled.
    ///
    /// # Errors
    ///
    /// Propagates the pool's [`DispatchError`] if the drain task could not
    /// be queued; jobs still waiting are dropped.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        let mut state = self.state.lock();
        state.jobs.push_back(Box::new(job));
        if state.scheduled {
            return Ok(());
        }
        state.scheduled = true;
        drop(state);

        let shared = Arc::clone(&self.state);
        self.dispatcher.submit(move || drain(&shared)).inspect_err(|_| {
            let mut state = self.state.lock();
            state.scheduled = false;
            state.jobs.clear();
        })
    }

    /// Jobs waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize { self.state.lock().jobs.len() }
}

fn drain(state: &Mutex<SerialState>) {
    loop {
        let job = {
            let mut guard = state.lock();
            match guard.jobs.pop_front() {
                Some(job) => job,
                None => {
                    guard.scheduled = false;
                    return;
                }
            }
        };
        panic::catch("serial task", job);
    }
}
