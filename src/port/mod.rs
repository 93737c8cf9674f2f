//! Readiness-event port internals.
//!
//! This module contains the moving parts behind [`Port`](crate::Port):
//!
//! - [`backend`]: the OS-specific readiness facility (epoll / kqueue),
//! - [`wakeup`]: the self-pipe used to interrupt a blocked poller,
//! - [`queue`]: the event queue workers take dispatch work from,
//! - [`registry`]: the descriptor table mapping fds to handlers,
//! - [`core`]: the port controller tying the pieces together,
//! - [`builder`]: configuration and construction.
//!
//! Everything here is crate-private; the public surface is re-exported
//! from the crate root.

pub(crate) mod backend;
pub(crate) mod builder;
pub(crate) mod core;
pub(crate) mod event;
pub(crate) mod queue;
pub(crate) mod registry;
pub(crate) mod wakeup;

use thiserror::Error;

/// Errors returned by port operations.
///
/// Construction failures surface as plain [`std::io::Error`]s from
/// [`PortBuilder::build`](builder::PortBuilder::build); once a port is
/// running, its operations fail only in the ways enumerated here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    /// The port has begun shutting down and no longer accepts work.
    #[error("port is shut down")]
    Rejected,

    /// The file descriptor is not registered with this port.
    #[error("descriptor is not registered with this port")]
    Unregistered,
}
