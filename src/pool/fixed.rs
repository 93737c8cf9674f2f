use crate::pool::{Task, TaskRejected, WorkerPool};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// A straightforward [`WorkerPool`] that spawns one named thread per
/// submitted task.
///
/// Dispatch loops submitted by a port run for the port's whole lifetime,
/// so the pool ends up with one thread per configured worker, plus one
/// per replacement.
#[derive(Clone)]
pub struct FixedPool {
    inner: Arc<Inner>,
}

struct Inner {
    /// Injected tasks awaiting collection by pool threads.
    tasks: Mutex<VecDeque<Task>>,

    /// Set once the pool stops accepting submissions.
    shutdown: AtomicBool,

    /// Join handles of spawned threads.
    handles: Mutex<Vec<JoinHandle<()>>>,

    /// Monotonic suffix for thread names.
    next_id: AtomicUsize,

    /// Prefix for thread names.
    name: String,
}

impl FixedPool {
    /// Creates a pool whose threads are named `port-worker-<n>`.
    pub fn new() -> Self {
        Self::named("port-worker")
    }

    /// Creates a pool with a custom thread-name prefix.
    pub fn named(prefix: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(VecDeque::new()),
                shutdown: AtomicBool::new(false),
                handles: Mutex::new(Vec::new()),
                next_id: AtomicUsize::new(0),
                name: prefix.to_string(),
            }),
        }
    }

    /// Stops accepting submissions and joins every spawned thread.
    ///
    /// Threads running a port dispatch loop exit only once their port is
    /// closed, so close the port before joining the pool.
    pub fn shutdown_and_join(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        let handles: Vec<_> = self.inner.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Default for FixedPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool for FixedPool {
    fn submit(&self, task: Task) -> Result<(), TaskRejected> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(TaskRejected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.inner.name, id);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || crate::pool::enter(|| task()))
            .map_err(|_| TaskRejected)?;

        self.inner.handles.lock().unwrap().push(handle);
        Ok(())
    }

    fn offer_task(&self, task: Task) {
        self.inner.tasks.lock().unwrap().push_back(task);
    }

    fn poll_next_task(&self) -> Option<Task> {
        self.inner.tasks.lock().unwrap().pop_front()
    }
}
