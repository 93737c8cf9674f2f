use crate::port::backend::unix::{sys_close, sys_pipe, sys_read_byte, sys_write_byte};

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

/// Self-pipe used to interrupt a poller blocked in the kernel wait.
///
/// The read end is registered with the backend as a persistent read
/// source; writing one byte to the write end makes a blocked wait return
/// with the read end marked readable. Coalescing concurrent wakeup
/// requests onto a single byte is the port controller's job, not this
/// type's: `signal` writes unconditionally.
pub(crate) struct WakeupPipe {
    read_fd: RawFd,
    write_fd: RawFd,
    closed: AtomicBool,
}

impl WakeupPipe {
    pub(crate) fn new() -> io::Result<Self> {
        let (read_fd, write_fd) = sys_pipe()?;

        Ok(Self {
            read_fd,
            write_fd,
            closed: AtomicBool::new(false),
        })
    }

    /// The end the backend watches for readability.
    pub(crate) fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Makes the pipe readable by writing one byte.
    pub(crate) fn signal(&self) -> io::Result<()> {
        sys_write_byte(self.write_fd)
    }

    /// Consumes exactly one pending byte, if any.
    ///
    /// Draining one byte at a time keeps the pipe readable while other
    /// wakeup requests are still outstanding, so pollers keep returning
    /// until every request has been seen.
    pub(crate) fn drain_one(&self) -> io::Result<bool> {
        sys_read_byte(self.read_fd)
    }

    /// Closes both ends. Safe to call more than once.
    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            sys_close(self.read_fd);
            sys_close(self.write_fd);
        }
    }
}

impl Drop for WakeupPipe {
    fn drop(&mut self) {
        self.close();
    }
}
