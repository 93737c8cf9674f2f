//! OS-specific readiness backends.
//!
//! Each backend adapts the native kernel facility to the same small
//! surface consumed by the port controller:
//!
//! - create the kernel object and register the wakeup pipe,
//! - arm and disarm per-descriptor interest,
//! - block for the next batch of events into a reusable buffer,
//! - decode buffer slots into `(fd, Events)` pairs.
//!
//! The backend for the current target is selected at compile time and
//! exposed under the `SysBackend` / `PollArray` aliases; the controller
//! code is identical on every platform.

#[cfg(target_os = "linux")]
pub(crate) mod epoll;

#[cfg(target_os = "macos")]
pub(crate) mod kqueue;

pub(crate) mod unix;

#[cfg(target_os = "linux")]
pub(crate) type SysBackend = epoll::EpollBackend;

#[cfg(target_os = "linux")]
pub(crate) type PollArray = epoll::PollArray;

#[cfg(target_os = "macos")]
pub(crate) type SysBackend = kqueue::KqueueBackend;

#[cfg(target_os = "macos")]
pub(crate) type PollArray = kqueue::PollArray;
