//! Linux `epoll` backend.
//!
//! This module adapts `epoll` to the backend surface consumed by the
//! port controller. It is functionally equivalent to the macOS `kqueue`
//! backend and is selected automatically on Linux targets.
//!
//! Responsibilities:
//! - Arm one-shot read/write interest for registered descriptors
//! - Block waiting for readiness batches into the poll array
//! - Keep the wakeup pipe persistently armed across cycles
//! - Decode raw events into portable `(fd, Events)` pairs
//!
//! Interest is armed with `EPOLLONESHOT`, so a delivery disables the
//! whole kernel entry for the descriptor until the next re-arm. Re-arms
//! update the existing entry in place and fall back to adding a fresh
//! one when the kernel no longer has it.

use crate::port::backend::unix::sys_close;
use crate::port::event::Events;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLONESHOT, EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// Reusable buffer filled by `epoll_wait` on each poll cycle.
///
/// Allocated once at port construction and handed to whichever thread is
/// currently polling. Its capacity bounds the batch size of one cycle.
pub(crate) struct PollArray {
    slots: Box<[epoll_event]>,
}

impl PollArray {
    pub(crate) fn new(capacity: usize) -> Self {
        let zero = epoll_event { events: 0, u64: 0 };

        Self {
            slots: vec![zero; capacity].into_boxed_slice(),
        }
    }
}

/// Linux `epoll` readiness backend.
pub(crate) struct EpollBackend {
    /// Epoll file descriptor, or `-1` once closed.
    epoll: AtomicI32,
}

impl EpollBackend {
    /// Creates the epoll instance.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll: AtomicI32::new(epoll),
        })
    }

    fn fd(&self) -> RawFd {
        self.epoll.load(Ordering::Acquire)
    }

    /// Registers the wakeup pipe's read end as a persistent read source.
    ///
    /// The wakeup descriptor is deliberately not one-shot: it must stay
    /// armed for as long as undrained bytes keep it readable.
    pub(crate) fn register_wakeup(&self, fd: RawFd) -> io::Result<()> {
        let mut ev = epoll_event {
            events: EPOLLIN as u32,
            u64: fd as u64,
        };

        let rc = unsafe { epoll_ctl(self.fd(), EPOLL_CTL_ADD, fd, &mut ev) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Arms one-shot interest in `desired` for `fd`.
    ///
    /// Updates the kernel entry in place when one exists; a previous
    /// one-shot delivery (or a descriptor that was never armed) leaves no
    /// entry behind, in which case a fresh one is added.
    ///
    /// # Panics
    ///
    /// Panics if the kernel rejects the update. That means the interest
    /// table no longer matches the registry, which is not recoverable.
    pub(crate) fn arm(&self, fd: RawFd, _previous: Events, desired: Events) {
        let mut ev = epoll_event {
            events: interest_bits(desired) | EPOLLONESHOT as u32,
            u64: fd as u64,
        };

        let rc = unsafe { epoll_ctl(self.fd(), EPOLL_CTL_MOD, fd, &mut ev) };
        if rc == 0 {
            return;
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            let rc = unsafe { epoll_ctl(self.fd(), EPOLL_CTL_ADD, fd, &mut ev) };
            if rc == 0 {
                return;
            }
            panic!(
                "epoll add for fd {fd} failed: {}",
                io::Error::last_os_error()
            );
        }

        panic!("epoll modify for fd {fd} failed: {err}");
    }

    /// Drops any kernel entry for `fd`.
    ///
    /// A missing entry is expected: a fired one-shot may already have
    /// consumed it, and the descriptor may never have been armed at all.
    /// `EBADF` is tolerated too, since deregistration may race the
    /// descriptor's own close.
    pub(crate) fn disarm(&self, fd: RawFd, _armed: Events) {
        let rc = unsafe { epoll_ctl(self.fd(), EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::EBADF) => {}
                _ => log::warn!("epoll delete for fd {fd} failed: {err}"),
            }
        }
    }

    /// Blocks until the kernel reports readiness, filling `array`.
    ///
    /// Interrupted waits are retried in place. With a negative
    /// `timeout_ms` the call returns only with at least one filled slot
    /// or an unrecoverable error; a bounded timeout may yield zero slots.
    pub(crate) fn wait(&self, array: &mut PollArray, timeout_ms: i32) -> io::Result<usize> {
        loop {
            let n = unsafe {
                epoll_wait(
                    self.fd(),
                    array.slots.as_mut_ptr(),
                    array.slots.len() as i32,
                    timeout_ms,
                )
            };

            if n >= 0 {
                return Ok(n as usize);
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Decodes slot `i` of the last `wait` batch.
    pub(crate) fn decode(&self, array: &PollArray, i: usize) -> (RawFd, Events) {
        let slot = array.slots[i];
        (slot.u64 as RawFd, ready_bits(slot.events))
    }

    /// Returns the interest bits spent by a one-shot delivery.
    ///
    /// An epoll one-shot disables the whole registration when any armed
    /// condition fires, so the entire interest set is consumed no matter
    /// which conditions were actually delivered.
    pub(crate) fn consumed(_delivered: Events) -> Events {
        Events::INTEREST
    }

    /// Closes the epoll descriptor. Safe to call more than once.
    pub(crate) fn close(&self) {
        let fd = self.epoll.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            sys_close(fd);
        }
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        self.close();
    }
}

fn interest_bits(events: Events) -> u32 {
    let mut bits = 0;

    if events.contains(Events::READ) {
        bits |= EPOLLIN;
    }
    if events.contains(Events::WRITE) {
        bits |= EPOLLOUT;
    }

    bits as u32
}

fn ready_bits(bits: u32) -> Events {
    let mut events = Events::empty();

    if bits & EPOLLIN as u32 != 0 {
        events |= Events::READ;
    }
    if bits & EPOLLOUT as u32 != 0 {
        events |= Events::WRITE;
    }
    if bits & EPOLLERR as u32 != 0 {
        events |= Events::ERROR;
    }
    if bits & EPOLLHUP as u32 != 0 {
        events |= Events::HANGUP;
    }

    events
}
