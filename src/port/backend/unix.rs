//! Thin wrappers over the Unix syscalls shared by both backends.

use std::io;
use std::os::unix::io::RawFd;

/// Creates a pipe with close-on-exec set on both ends and the read end
/// switched to non-blocking mode.
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as libc::c_int; 2];

    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let (read_fd, write_fd) = (fds[0], fds[1]);

    if let Err(err) = configure_pipe(read_fd, write_fd) {
        sys_close(read_fd);
        sys_close(write_fd);
        return Err(err);
    }

    Ok((read_fd, write_fd))
}

fn configure_pipe(read_fd: RawFd, write_fd: RawFd) -> io::Result<()> {
    sys_set_cloexec(read_fd)?;
    sys_set_cloexec(write_fd)?;
    sys_set_nonblocking(read_fd)
}

pub(crate) fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Writes a single byte to `fd`, retrying on `EINTR`.
pub(crate) fn sys_write_byte(fd: RawFd) -> io::Result<()> {
    let byte = 1u8;

    loop {
        let n = unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
        if n >= 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Reads a single byte from a non-blocking `fd`, retrying on `EINTR`.
///
/// Returns `false` when no byte was available.
pub(crate) fn sys_read_byte(fd: RawFd) -> io::Result<bool> {
    let mut byte = 0u8;

    loop {
        let n = unsafe { libc::read(fd, &mut byte as *mut u8 as *mut libc::c_void, 1) };
        if n > 0 {
            return Ok(true);
        }
        if n == 0 {
            return Ok(false);
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return Ok(false),
            _ => return Err(err),
        }
    }
}

/// Closes `fd`, ignoring the result.
///
/// Close errors are unrecoverable here; the descriptor is gone either way.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}
