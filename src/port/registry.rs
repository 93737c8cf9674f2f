use crate::port::event::{EventHandler, Events};

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI16, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A registered descriptor: its handler plus the interest currently
/// armed with the kernel.
pub(crate) struct Registration {
    /// Handler invoked for deliveries on this descriptor.
    handler: Arc<dyn EventHandler>,

    /// Interest bits armed with the kernel right now.
    ///
    /// Kept atomic so a delivery can consume spent interest while the
    /// registry is only read-locked.
    registered: AtomicI16,
}

impl Registration {
    pub(crate) fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            registered: AtomicI16::new(Events::empty().bits()),
        }
    }

    pub(crate) fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }

    /// Interest currently armed with the kernel.
    pub(crate) fn armed(&self) -> Events {
        Events::from_bits_truncate(self.registered.load(Ordering::Acquire))
    }

    /// Replaces the armed interest, returning what was armed before.
    pub(crate) fn swap_armed(&self, desired: Events) -> Events {
        Events::from_bits_truncate(self.registered.swap(desired.bits(), Ordering::AcqRel))
    }

    /// Clears the interest bits spent by a one-shot delivery.
    pub(crate) fn consume(&self, spent: Events) {
        self.registered.fetch_and(!spent.bits(), Ordering::AcqRel);
    }
}

/// Table of registered descriptors.
///
/// Reader-writer locking matches the access pattern: every poll cycle
/// reads the table to bind events to handlers, while registration
/// changes are comparatively rare. Holding the read lock across a batch
/// also pins each bound registration until its event is queued, so a
/// concurrent deregistration cannot tear a delivery in half.
pub(crate) struct Registry {
    channels: RwLock<HashMap<RawFd, Arc<Registration>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HashMap<RawFd, Arc<Registration>>> {
        self.channels.read().unwrap()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HashMap<RawFd, Arc<Registration>>> {
        self.channels.write().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::{Registration, Registry};
    use crate::port::event::{EventHandler, Events};

    use std::sync::Arc;

    struct Noop;

    impl EventHandler for Noop {
        fn on_event(&self, _events: Events, _pooled: bool) {}
    }

    #[test]
    fn test_registration_starts_unarmed() {
        let reg = Registration::new(Arc::new(Noop));

        assert_eq!(reg.armed(), Events::empty());
    }

    #[test]
    fn test_swap_armed_returns_previous_interest() {
        let reg = Registration::new(Arc::new(Noop));

        assert_eq!(reg.swap_armed(Events::READ), Events::empty());
        assert_eq!(reg.swap_armed(Events::READ | Events::WRITE), Events::READ);
        assert_eq!(reg.armed(), Events::READ | Events::WRITE);
    }

    #[test]
    fn test_consume_clears_only_spent_bits() {
        let reg = Registration::new(Arc::new(Noop));

        reg.swap_armed(Events::READ | Events::WRITE);
        reg.consume(Events::READ);

        assert_eq!(reg.armed(), Events::WRITE);
    }

    #[test]
    fn test_insert_replace_and_remove() {
        let registry = Registry::new();

        let first = Arc::new(Registration::new(Arc::new(Noop)));
        let second = Arc::new(Registration::new(Arc::new(Noop)));

        assert!(registry.write().insert(7, first.clone()).is_none());

        let replaced = registry.write().insert(7, second).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));

        assert!(registry.read().contains_key(&7));
        assert!(registry.write().remove(&7).is_some());
        assert!(registry.write().remove(&7).is_none());
    }
}
