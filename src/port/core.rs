use crate::pool::{self, Task, WorkerPool};
use crate::port::PortError;
use crate::port::backend::{PollArray, SysBackend};
use crate::port::event::{EventHandler, Events, PendingEvent};
use crate::port::queue::EventQueue;
use crate::port::registry::{Registration, Registry};
use crate::port::wakeup::WakeupPipe;

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A readiness-event port.
///
/// `Port` multiplexes kernel readiness for a set of registered file
/// descriptors and dispatches each delivery to the descriptor's handler
/// on a worker-pool thread. Handles are cheap to clone and share one
/// underlying port.
///
/// A port must be closed explicitly with [`close`](Port::close);
/// dropping every handle leaves the dispatch loops running.
#[derive(Clone)]
pub struct Port {
    inner: Arc<PortInner>,
}

pub(crate) struct PortInner {
    /// Kernel readiness backend.
    backend: SysBackend,

    /// Self-pipe interrupting blocked polls.
    wakeup: WakeupPipe,

    /// Outstanding wakeup requests. See `request_wakeup`.
    wakeup_pending: AtomicUsize,

    /// Poll buffer, held by whichever thread is currently the poller.
    buffer: Mutex<PollArray>,

    /// Threads inside the kernel wait. Tests observe that it never
    /// exceeds one.
    #[cfg(test)]
    in_poll: AtomicUsize,

    /// Dispatch queue shared by the worker threads.
    queue: EventQueue,

    /// Registered descriptors.
    registry: Registry,

    /// Thread supply.
    pool: Arc<dyn WorkerPool>,

    /// Dispatch loops currently alive.
    threads: AtomicUsize,

    /// Number of dispatch loops `start` submits.
    worker_threads: usize,

    /// Set once `close` is called; no new work is accepted.
    shutdown: AtomicBool,

    /// Latched once kernel resources have been released.
    closed: Mutex<bool>,

    /// Signalled when `closed` flips, for `await_termination`.
    terminated: Condvar,
}

impl Port {
    pub(crate) fn new(
        pool: Arc<dyn WorkerPool>,
        worker_threads: usize,
        max_events: usize,
    ) -> io::Result<Port> {
        let backend = SysBackend::new()?;
        let wakeup = WakeupPipe::new()?;
        backend.register_wakeup(wakeup.read_fd())?;

        let queue = EventQueue::with_capacity(max_events);
        queue.offer(PendingEvent::NeedToPoll);

        Ok(Port {
            inner: Arc::new(PortInner {
                backend,
                wakeup,
                wakeup_pending: AtomicUsize::new(0),
                buffer: Mutex::new(PollArray::new(max_events)),
                #[cfg(test)]
                in_poll: AtomicUsize::new(0),
                queue,
                registry: Registry::new(),
                pool,
                threads: AtomicUsize::new(0),
                worker_threads,
                shutdown: AtomicBool::new(false),
                closed: Mutex::new(false),
                terminated: Condvar::new(),
            }),
        })
    }

    /// Submits the configured number of dispatch loops to the pool.
    ///
    /// Each loop is counted as live before it is submitted, so a loop
    /// that exits immediately can never drive the count negative.
    pub fn start(&self) -> Result<(), PortError> {
        if self.inner.is_shutdown() {
            return Err(PortError::Rejected);
        }

        for _ in 0..self.inner.worker_threads {
            let inner = self.inner.clone();

            self.inner.threads.fetch_add(1, Ordering::SeqCst);
            if let Err(err) = self
                .inner
                .pool
                .submit(Box::new(move || dispatch_loop(&inner)))
            {
                self.inner.threads.fetch_sub(1, Ordering::SeqCst);
                log::error!("failed to start dispatch loop: {err}");
                return Err(PortError::Rejected);
            }
        }

        Ok(())
    }

    /// Attaches `handler` to `fd`.
    ///
    /// The descriptor starts with no armed interest; nothing is
    /// delivered until [`update_interest`](Port::update_interest) arms
    /// it. Registering a descriptor that is already registered replaces
    /// the previous registration and disarms whatever interest it still
    /// had.
    pub fn register(&self, fd: RawFd, handler: Arc<dyn EventHandler>) -> Result<(), PortError> {
        let mut channels = self.inner.registry.write();

        if self.inner.is_shutdown() {
            return Err(PortError::Rejected);
        }

        let registration = Arc::new(Registration::new(handler));
        if let Some(old) = channels.insert(fd, registration) {
            self.inner.backend.disarm(fd, old.armed());
        }

        Ok(())
    }

    /// Detaches `fd` from the port and drops its kernel interest.
    ///
    /// Deregistration stays available while the port drains during
    /// shutdown and is refused only once the port has fully closed.
    /// Events already decoded against the old registration may still be
    /// delivered.
    pub fn deregister(&self, fd: RawFd) -> Result<(), PortError> {
        if self.inner.is_closed() {
            return Err(PortError::Rejected);
        }

        let mut channels = self.inner.registry.write();

        match channels.remove(&fd) {
            Some(old) => {
                self.inner.backend.disarm(fd, old.armed());
                Ok(())
            }
            None => Err(PortError::Unregistered),
        }
    }

    /// Arms one-shot interest in `events` for a registered descriptor.
    ///
    /// Only [`Events::READ`] and [`Events::WRITE`] can be armed; other
    /// bits are stripped. The armed set replaces the previous one: bits
    /// no longer wanted are disarmed, new bits are armed, and arming the
    /// set that is already armed is a no-op without kernel calls.
    /// Arming the empty set cancels pending interest entirely.
    ///
    /// After a delivery consumes armed interest, this is also the call
    /// that re-arms the descriptor for its next event.
    pub fn update_interest(&self, fd: RawFd, events: Events) -> Result<(), PortError> {
        if self.inner.is_shutdown() {
            return Err(PortError::Rejected);
        }

        let desired = events & Events::INTEREST;

        let channels = self.inner.registry.read();
        let registration = channels.get(&fd).ok_or(PortError::Unregistered)?;

        let previous = registration.swap_armed(desired);
        if previous == desired {
            return Ok(());
        }

        self.inner.backend.arm(fd, previous, desired);
        Ok(())
    }

    /// Runs `task` on one of the port's worker threads.
    ///
    /// The task is queued with the pool and one wakeup is issued so that
    /// a worker collects it promptly, whether it is blocked in the
    /// kernel wait or on the dispatch queue.
    pub fn execute(&self, task: Task) -> Result<(), PortError> {
        // Holding the close latch keeps the pipe alive across the wakeup.
        let closed = self.inner.closed.lock().unwrap();

        if *closed || self.inner.is_shutdown() {
            return Err(PortError::Rejected);
        }

        self.inner.pool.offer_task(task);
        self.inner.request_wakeup();

        drop(closed);
        Ok(())
    }

    /// Begins shutdown: the port stops accepting work and wakes every
    /// worker.
    ///
    /// Each live dispatch loop receives one wakeup and exits upon taking
    /// it; the last loop out releases the kernel resources. With no live
    /// loops the resources are released right here. `close` does not
    /// wait; pair it with [`await_termination`](Port::await_termination).
    pub fn close(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);

        let threads = self.inner.threads.load(Ordering::SeqCst);
        if threads == 0 {
            self.inner.impl_close();
            return;
        }

        let closed = self.inner.closed.lock().unwrap();
        if !*closed {
            for _ in 0..threads {
                self.inner.request_wakeup();
            }
        }
        drop(closed);
    }

    /// Blocks until the port has fully closed or `timeout` elapses.
    ///
    /// Returns `true` once every dispatch loop has exited and kernel
    /// resources have been released. A `timeout` too large for the
    /// clock to represent waits without a deadline.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);

        let mut closed = self.inner.closed.lock().unwrap();
        while !*closed {
            closed = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }

                    let (guard, _) = self
                        .inner
                        .terminated
                        .wait_timeout(closed, deadline - now)
                        .unwrap();
                    guard
                }
                None => self.inner.terminated.wait(closed).unwrap(),
            };
        }

        true
    }

    /// Whether shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }
}

impl PortInner {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Requests one wakeup delivery, writing to the pipe only for the
    /// first request of a burst.
    ///
    /// The pending counter carries the number of outstanding requests
    /// while the pipe carries one byte per burst. Pollers decrement the
    /// counter once per delivery and drain the byte only when the count
    /// returns to zero, so the pipe stays readable until every request
    /// has been seen.
    fn request_wakeup(&self) {
        if self.wakeup_pending.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Err(err) = self.wakeup.signal() {
                panic!("wakeup pipe write failed: {err}");
            }
        }
    }

    /// Runs one poll cycle as the current poller.
    ///
    /// Blocks in the kernel wait, decodes the batch under the registry
    /// read lock, queues every dispatchable event but the last, and
    /// returns the last one for the caller to handle directly. Events
    /// whose registration is gone are dropped; if that empties a whole
    /// batch, the cycle polls again.
    ///
    /// The poll sentinel returns to the queue on every exit path,
    /// including errors, so the port can never lose its poller.
    fn poll_cycle(&self) -> io::Result<PendingEvent> {
        let _token = PollToken { inner: self };

        loop {
            let mut buffer = self.buffer.lock().unwrap();

            #[cfg(test)]
            self.in_poll.fetch_add(1, Ordering::SeqCst);
            let polled = self.backend.wait(&mut buffer, -1);
            #[cfg(test)]
            self.in_poll.fetch_sub(1, Ordering::SeqCst);

            let n = polled?;
            log::trace!("poll batch of {n} events");

            let channels = self.registry.read();

            let mut last = None;
            for i in 0..n {
                let (fd, revents) = self.backend.decode(&buffer, i);

                let event = if fd == self.wakeup.read_fd() {
                    if self.wakeup_pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        self.wakeup.drain_one()?;
                    }
                    PendingEvent::TaskOrShutdown
                } else {
                    match channels.get(&fd) {
                        Some(registration) => {
                            registration.consume(SysBackend::consumed(revents));
                            PendingEvent::Ready {
                                handler: registration.handler().clone(),
                                events: revents,
                            }
                        }
                        // Raced with deregistration; drop the event.
                        None => continue,
                    }
                };

                if let Some(prev) = last.replace(event) {
                    self.queue.offer(prev);
                }
            }

            if let Some(event) = last {
                return Ok(event);
            }
        }
    }

    /// Bookkeeping for a dispatch loop that is about to exit.
    ///
    /// A loop that went down inside a handler or task submits a
    /// replacement, which inherits this loop's slot in the live count.
    /// Otherwise the count drops, and whoever drops it to zero after
    /// shutdown began performs the final close.
    fn thread_exit(self: Arc<Self>, replace: bool) {
        if replace {
            let inner = self.clone();
            if self
                .pool
                .submit(Box::new(move || dispatch_loop(&inner)))
                .is_ok()
            {
                return;
            }
            log::warn!("pool rejected replacement dispatch loop");
        }

        let remaining = self.threads.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.is_shutdown() {
            self.impl_close();
        }
    }

    /// Releases kernel resources exactly once and signals termination.
    fn impl_close(&self) {
        {
            let mut closed = self.closed.lock().unwrap();
            if *closed {
                return;
            }
            *closed = true;
            self.terminated.notify_all();
        }

        self.wakeup.close();
        self.backend.close();
        log::debug!("port closed");
    }
}

/// The loop each worker thread runs.
///
/// Threads alternate roles through the queue sentinels: taking
/// `NeedToPoll` makes the thread the poller, `TaskOrShutdown` makes it
/// run an injected task or exit, and `Ready` makes it invoke a handler.
/// The exit guard keeps the live-thread accounting correct even when a
/// handler panics through the loop.
fn dispatch_loop(inner: &Arc<PortInner>) {
    let pooled = pool::on_pool_thread();
    let mut exit = ExitGuard {
        inner: inner.clone(),
        replace: false,
    };

    loop {
        exit.replace = false;

        let event = match inner.queue.take() {
            PendingEvent::NeedToPoll => match inner.poll_cycle() {
                Ok(event) => event,
                Err(err) => {
                    log::error!("poll failed: {err}");
                    return;
                }
            },
            event => event,
        };

        match event {
            PendingEvent::NeedToPoll => {
                unreachable!("a poll cycle never returns the poll sentinel")
            }
            PendingEvent::TaskOrShutdown => match inner.pool.poll_next_task() {
                Some(task) => {
                    exit.replace = true;
                    task();
                }
                None => return,
            },
            PendingEvent::Ready { handler, events } => {
                exit.replace = true;
                handler.on_event(events, pooled);
            }
        }
    }
}

/// Returns the poll sentinel to the queue when the poller leaves
/// `poll_cycle`, however it leaves.
struct PollToken<'a> {
    inner: &'a PortInner,
}

impl Drop for PollToken<'_> {
    fn drop(&mut self) {
        self.inner.queue.offer(PendingEvent::NeedToPoll);
    }
}

/// Runs the exit bookkeeping when a dispatch loop returns or unwinds.
struct ExitGuard {
    inner: Arc<PortInner>,
    replace: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.inner.clone().thread_exit(self.replace);
    }
}
