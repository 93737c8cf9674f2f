//! Worker-pool integration.
//!
//! A [`Port`](crate::Port) does not own threads. It borrows them from a
//! [`WorkerPool`]: starting the port submits one dispatch loop per
//! configured worker, and injected tasks flow through the pool's task
//! queue so the same threads that poll readiness also run them.
//!
//! [`FixedPool`] is a ready-made implementation; any executor can take
//! its place by implementing the trait.

mod fixed;

pub use fixed::FixedPool;

use thiserror::Error;

use std::cell::Cell;

/// A unit of work runnable on a pool thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Error returned when a pool refuses new work.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("pool rejected the task")]
pub struct TaskRejected;

/// The thread supply consumed by a port.
///
/// Implementations must be shareable across threads; the port calls into
/// the pool from its own dispatch loops as well as from caller threads.
pub trait WorkerPool: Send + Sync + 'static {
    /// Runs `task` on a pool thread as soon as one is free.
    ///
    /// The port uses this to start its dispatch loops and to replace a
    /// loop whose thread was kept busy by a long-running handler.
    fn submit(&self, task: Task) -> Result<(), TaskRejected>;

    /// Queues `task` for later collection by [`poll_next_task`].
    ///
    /// Unlike `submit`, this must not spawn or wake anything itself; the
    /// port pairs it with its own wakeup protocol.
    ///
    /// [`poll_next_task`]: WorkerPool::poll_next_task
    fn offer_task(&self, task: Task);

    /// Collects a previously offered task, if any.
    fn poll_next_task(&self) -> Option<Task>;
}

thread_local! {
    /// Whether the current thread belongs to a worker pool.
    static POOL_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as pool-owned for the duration of `f`.
///
/// Pool implementations wrap the body of each worker thread in this.
/// Handlers receive the resulting flag as the `pooled` argument of
/// [`EventHandler::on_event`](crate::EventHandler::on_event) and can use
/// it to decide whether blocking the current thread is acceptable.
pub fn enter<R>(f: impl FnOnce() -> R) -> R {
    POOL_THREAD.with(|flag| {
        let prev = flag.replace(true);

        let out = f();

        flag.set(prev);
        out
    })
}

/// Whether the current thread is marked as pool-owned.
pub(crate) fn on_pool_thread() -> bool {
    POOL_THREAD.with(Cell::get)
}
