//! macOS `kqueue` backend.
//!
//! This module adapts `kqueue` to the backend surface consumed by the
//! port controller. It is functionally equivalent to the Linux `epoll`
//! backend and is selected automatically on macOS targets.
//!
//! Responsibilities:
//! - Arm one-shot read/write interest for registered descriptors
//! - Block waiting for readiness batches into the poll array
//! - Keep the wakeup pipe persistently armed across cycles
//! - Decode raw kevents into portable `(fd, Events)` pairs
//!
//! Unlike epoll, kqueue tracks read and write interest as independent
//! filters, so interest changes are applied as per-filter deltas: newly
//! wanted conditions are added with `EV_ONESHOT`, dropped conditions are
//! deleted. A fired one-shot filter removes itself, consuming only that
//! condition and leaving the sibling filter armed.

use crate::port::backend::unix::{sys_close, sys_set_cloexec};
use crate::port::event::Events;

use libc::{EV_ADD, EV_DELETE, EV_EOF, EV_ERROR, EV_ONESHOT, EVFILT_READ, EVFILT_WRITE, kevent};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// Reusable buffer filled by `kevent` on each poll cycle.
///
/// Allocated once at port construction and handed to whichever thread is
/// currently polling. Its capacity bounds the batch size of one cycle.
pub(crate) struct PollArray {
    slots: Box<[kevent]>,
}

// kevent carries a raw `udata` pointer, which this crate never sets.
unsafe impl Send for PollArray {}

impl PollArray {
    pub(crate) fn new(capacity: usize) -> Self {
        let zero: kevent = unsafe { std::mem::zeroed() };

        Self {
            slots: vec![zero; capacity].into_boxed_slice(),
        }
    }
}

/// macOS `kqueue` readiness backend.
pub(crate) struct KqueueBackend {
    /// Kqueue file descriptor, or `-1` once closed.
    kq: AtomicI32,
}

impl KqueueBackend {
    /// Creates the kqueue instance.
    pub(crate) fn new() -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        if let Err(err) = sys_set_cloexec(kq) {
            sys_close(kq);
            return Err(err);
        }

        Ok(Self {
            kq: AtomicI32::new(kq),
        })
    }

    fn fd(&self) -> RawFd {
        self.kq.load(Ordering::Acquire)
    }

    /// Registers the wakeup pipe's read end as a persistent read source.
    ///
    /// The wakeup descriptor is deliberately not one-shot: it must stay
    /// armed for as long as undrained bytes keep it readable.
    pub(crate) fn register_wakeup(&self, fd: RawFd) -> io::Result<()> {
        self.change(fd, EVFILT_READ, EV_ADD)
    }

    /// Arms one-shot interest in `desired` for `fd`.
    ///
    /// Each filter is reconciled independently against `previous`, the
    /// interest that was armed before this call.
    ///
    /// # Panics
    ///
    /// Panics if the kernel rejects an addition. That means the interest
    /// table no longer matches the registry, which is not recoverable.
    pub(crate) fn arm(&self, fd: RawFd, previous: Events, desired: Events) {
        self.arm_filter(
            fd,
            EVFILT_READ,
            previous.contains(Events::READ),
            desired.contains(Events::READ),
        );
        self.arm_filter(
            fd,
            EVFILT_WRITE,
            previous.contains(Events::WRITE),
            desired.contains(Events::WRITE),
        );
    }

    fn arm_filter(&self, fd: RawFd, filter: i16, had: bool, want: bool) {
        if want == had {
            return;
        }

        if want {
            if let Err(err) = self.change(fd, filter, EV_ADD | EV_ONESHOT) {
                panic!("kqueue add for fd {fd} failed: {err}");
            }
        } else {
            self.delete(fd, filter);
        }
    }

    /// Drops the kernel filters still armed for `fd`.
    ///
    /// A missing filter is expected: a fired one-shot removes itself, and
    /// the descriptor may never have been armed at all.
    pub(crate) fn disarm(&self, fd: RawFd, armed: Events) {
        if armed.contains(Events::READ) {
            self.delete(fd, EVFILT_READ);
        }
        if armed.contains(Events::WRITE) {
            self.delete(fd, EVFILT_WRITE);
        }
    }

    fn delete(&self, fd: RawFd, filter: i16) {
        if let Err(err) = self.change(fd, filter, EV_DELETE) {
            match err.raw_os_error() {
                // Fired one-shots remove themselves, and deregistration
                // may race the descriptor's own close.
                Some(libc::ENOENT) | Some(libc::EBADF) => {}
                _ => log::warn!("kqueue delete for fd {fd} failed: {err}"),
            }
        }
    }

    /// Submits a single change to the kqueue, retrying on `EINTR`.
    fn change(&self, fd: RawFd, filter: i16, flags: u16) -> io::Result<()> {
        let change = kevent {
            ident: fd as libc::uintptr_t,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        };

        loop {
            let rc = unsafe {
                libc::kevent(
                    self.fd(),
                    &change,
                    1,
                    std::ptr::null_mut(),
                    0,
                    std::ptr::null(),
                )
            };

            if rc >= 0 {
                return Ok(());
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Blocks until the kernel reports readiness, filling `array`.
    ///
    /// Interrupted waits are retried in place. With a negative
    /// `timeout_ms` the call returns only with at least one filled slot
    /// or an unrecoverable error; a bounded timeout may yield zero slots.
    pub(crate) fn wait(&self, array: &mut PollArray, timeout_ms: i32) -> io::Result<usize> {
        let timeout = if timeout_ms < 0 {
            None
        } else {
            Some(libc::timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms % 1000) as libc::c_long) * 1_000_000,
            })
        };
        let ts_ptr = timeout
            .as_ref()
            .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);

        loop {
            let n = unsafe {
                libc::kevent(
                    self.fd(),
                    std::ptr::null(),
                    0,
                    array.slots.as_mut_ptr(),
                    array.slots.len() as libc::c_int,
                    ts_ptr,
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

        let mut events = match slot.filter {
            EVFILT_READ => Events::READ,
            EVFILT_WRITE => Events::WRITE,
            _ => Events::empty(),
        };

        if slot.flags & EV_ERROR != 0 {
            events |= Events::ERROR;
        }
        if slot.flags & EV_EOF != 0 {
            events |= Events::HANGUP;
        }

        (slot.ident as RawFd, events)
    }

    /// Returns the interest bits spent by a one-shot delivery.
    ///
    /// A fired kqueue one-shot removes only its own filter, so just the
    /// delivered conditions are consumed; interest armed on the sibling
    /// filter stays in place.
    pub(crate) fn consumed(delivered: Events) -> Events {
        delivered & Events::INTEREST
    }

    /// Closes the kqueue descriptor. Safe to call more than once.
    pub(crate) fn close(&self) {
        let fd = self.kq.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            sys_close(fd);
        }
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        self.close();
    }
}
