//! # Portmux
//!
//! **Portmux** is a kernel readiness-event multiplexer for Unix targets,
//! designed as the I/O dispatch layer for the **Nebula** ecosystem.
//!
//! A [`Port`] watches a dynamic set of file descriptors through the native
//! readiness facility (`epoll` on Linux, `kqueue` on macOS) and dispatches
//! each event to the handler registered for that descriptor, on threads
//! borrowed from a caller-supplied worker pool. Any worker can take a turn
//! polling the kernel; the rest drain already-decoded events or run injected
//! tasks, so a single `Port` scales across a whole pool without a dedicated
//! poller thread.
//!
//! Readiness is delivered one-shot: after an event fires for a descriptor,
//! its interest must be re-armed with [`Port::update_interest`] before the
//! next event is delivered. This mirrors the semantics of completion-style
//! I/O groups and keeps handler execution race-free without per-descriptor
//! locks.
//!
//! Portmux offers:
//!
//! - A **shared poller**: every pool thread alternates between polling and
//!   handling, coordinated by an internal event queue
//! - **One-shot interest registration** with delta-based re-arming
//! - **Task injection** onto the same pool via [`Port::execute`]
//! - **Orderly shutdown** that wakes every worker exactly once and releases
//!   kernel resources exactly once
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portmux::pool::FixedPool;
//! use portmux::{EventHandler, Events, PortBuilder};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Echo;
//!
//! impl EventHandler for Echo {
//!     fn on_event(&self, events: Events, pooled: bool) {
//!         // Read from the descriptor, then re-arm with update_interest.
//!     }
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let pool = Arc::new(FixedPool::new());
//!     let port = PortBuilder::new().worker_threads(4).build(pool)?;
//!     port.start().unwrap();
//!
//!     // port.register(fd, Arc::new(Echo)) and port.update_interest(fd, Events::READ)
//!
//!     port.close();
//!     port.await_termination(Duration::from_secs(1));
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`pool`]: worker-pool integration, the [`pool::WorkerPool`] trait and
//!   a ready-made fixed pool

mod port;

pub mod pool;

pub use port::PortError;
pub use port::builder::PortBuilder;
pub use port::core::Port;
pub use port::event::{EventHandler, Events};
