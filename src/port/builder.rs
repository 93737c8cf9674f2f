use crate::pool::WorkerPool;
use crate::port::core::Port;

use std::io;
use std::sync::Arc;
use std::thread;

/// Builder for configuring and creating a [`Port`].
///
/// # Examples
///
/// ```rust,ignore
/// let pool = Arc::new(FixedPool::new());
/// let port = PortBuilder::new()
///     .worker_threads(4)
///     .build(pool)?;
/// ```
pub struct PortBuilder {
    /// Number of dispatch loops submitted to the pool on start.
    worker_threads: usize,

    /// Capacity of the poll array.
    max_events: usize,
}

impl PortBuilder {
    /// Creates a new `PortBuilder` with default configuration.
    ///
    /// By default the number of worker threads is the number of available
    /// logical CPUs, falling back to `1` if unavailable, and the poll
    /// array holds 512 events.
    pub fn new() -> Self {
        let worker_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            worker_threads,
            max_events: 512,
        }
    }

    /// Sets the number of dispatch loops the port submits to its pool.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be > 0");

        self.worker_threads = n;
        self
    }

    /// Sets the capacity of the poll array.
    ///
    /// This bounds how many readiness events a single poll cycle can
    /// decode and, through the dispatch protocol, the occupancy of the
    /// internal event queue.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_events(mut self, n: usize) -> Self {
        assert!(n > 0, "max_events must be > 0");

        self.max_events = n;
        self
    }

    /// Builds the port with the configured options.
    ///
    /// This creates the kernel backend and the wakeup pipe. The port is
    /// idle until [`Port::start`] submits its dispatch loops to `pool`.
    pub fn build(self, pool: Arc<dyn WorkerPool>) -> io::Result<Port> {
        Port::new(pool, self.worker_threads, self.max_events)
    }
}

impl Default for PortBuilder {
    /// Creates a default `PortBuilder`.
    fn default() -> Self {
        Self::new()
    }
}
