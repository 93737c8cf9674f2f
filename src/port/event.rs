use std::sync::Arc;

use bitflags::bitflags;

bitflags! {
    /// A set of readiness conditions on a file descriptor.
    ///
    /// The bit values follow the portable `poll(2)` constants so that a
    /// mask travels unchanged between the public API and both kernel
    /// backends.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Events: i16 {
        /// Data is available to read.
        const READ = libc::POLLIN;

        /// The descriptor accepts writes without blocking.
        const WRITE = libc::POLLOUT;

        /// An error condition is pending.
        const ERROR = libc::POLLERR;

        /// The peer hung up or the stream reached end-of-input.
        const HANGUP = libc::POLLHUP;
    }
}

impl Events {
    /// The conditions a caller may arm interest in.
    ///
    /// `ERROR` and `HANGUP` are reported whenever they occur; they cannot
    /// be armed or suppressed and are stripped from interest masks.
    pub const INTEREST: Events = Events::READ.union(Events::WRITE);
}

/// A callback invoked when a registered descriptor becomes ready.
///
/// One handler is attached per descriptor at registration time. The port
/// holds it behind an `Arc` and may invoke it from any worker thread, so
/// implementations must synchronize interior state themselves.
///
/// Delivery is one-shot: after `on_event` fires, no further events arrive
/// for the descriptor until interest is re-armed with
/// [`Port::update_interest`](crate::Port::update_interest).
pub trait EventHandler: Send + Sync + 'static {
    /// Handles a readiness delivery.
    ///
    /// # Arguments
    ///
    /// * `events` - The conditions that fired, plus `ERROR`/`HANGUP` when
    ///   the kernel reports them.
    /// * `pooled` - `true` when running on a thread owned by the port's
    ///   worker pool. Handlers that would block for long may use this to
    ///   decide whether to hand the work off rather than occupy a pool
    ///   thread.
    fn on_event(&self, events: Events, pooled: bool);
}

/// A unit of dispatch work carried by the port's event queue.
///
/// Besides decoded readiness events, the queue carries two sentinels that
/// coordinate the worker threads without any dedicated poller thread.
pub(crate) enum PendingEvent {
    /// A readiness event for a registered descriptor, decoded and bound
    /// to its handler while the registration was still live.
    Ready {
        handler: Arc<dyn EventHandler>,
        events: Events,
    },

    /// The thread that takes this sentinel becomes the poller.
    ///
    /// Exactly one `NeedToPoll` circulates per port, which is what keeps
    /// at most one thread inside the kernel wait at a time.
    NeedToPoll,

    /// The taker should pull an injected task from the pool, or exit its
    /// dispatch loop if none is queued (shutdown).
    TaskOrShutdown,
}
