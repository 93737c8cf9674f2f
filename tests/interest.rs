use portmux::pool::FixedPool;
use portmux::{EventHandler, Events, Port, PortBuilder, PortError};

use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct Recorder {
    hits: AtomicUsize,
    last: Mutex<Option<Events>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            hits: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn last(&self) -> Option<Events> {
        *self.last.lock().unwrap()
    }
}

impl EventHandler for Recorder {
    fn on_event(&self, events: Events, _pooled: bool) {
        *self.last.lock().unwrap() = Some(events);
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

fn start_port(workers: usize) -> Port {
    let pool = Arc::new(FixedPool::new());
    let port = PortBuilder::new()
        .worker_threads(workers)
        .max_events(64)
        .build(pool)
        .unwrap();
    port.start().unwrap();
    port
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_update_interest_requires_registration() {
    let port = start_port(1);
    let (_writer, reader) = UnixStream::pair().unwrap();

    assert_eq!(
        port.update_interest(reader.as_raw_fd(), Events::READ)
            .unwrap_err(),
        PortError::Unregistered
    );

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_deregister_unknown_descriptor_fails() {
    let port = start_port(1);
    let (_writer, reader) = UnixStream::pair().unwrap();

    assert_eq!(
        port.deregister(reader.as_raw_fd()).unwrap_err(),
        PortError::Unregistered
    );

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_arming_same_mask_twice_delivers_once() {
    let port = start_port(2);
    let (mut writer, reader) = UnixStream::pair().unwrap();

    let recorder = Recorder::new();
    port.register(reader.as_raw_fd(), recorder.clone()).unwrap();

    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();
    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();

    writer.write_all(b"x").unwrap();

    assert!(wait_until(Duration::from_secs(2), || recorder.hits() == 1));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(recorder.hits(), 1);

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_write_interest_fires_on_writable_descriptor() {
    let port = start_port(2);
    let (writer, _reader) = UnixStream::pair().unwrap();

    let recorder = Recorder::new();
    port.register(writer.as_raw_fd(), recorder.clone()).unwrap();
    port.update_interest(writer.as_raw_fd(), Events::WRITE)
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || recorder.hits() == 1));
    assert!(recorder.last().unwrap().contains(Events::WRITE));

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_empty_interest_cancels_pending_arm() {
    let port = start_port(2);
    let (mut writer, reader) = UnixStream::pair().unwrap();

    let recorder = Recorder::new();
    port.register(reader.as_raw_fd(), recorder.clone()).unwrap();

    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();
    port.update_interest(reader.as_raw_fd(), Events::empty())
        .unwrap();

    writer.write_all(b"x").unwrap();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(recorder.hits(), 0);

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_interest_cycles_between_read_and_write() {
    let port = start_port(2);
    let (mut writer, reader) = UnixStream::pair().unwrap();

    let recorder = Recorder::new();
    port.register(reader.as_raw_fd(), recorder.clone()).unwrap();

    writer.write_all(b"x").unwrap();
    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || recorder.hits() == 1));
    assert!(recorder.last().unwrap().contains(Events::READ));

    // The read side of a socketpair is itself writable, so flipping the
    // armed set delivers promptly with the new condition.
    port.update_interest(reader.as_raw_fd(), Events::WRITE)
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || recorder.hits() == 2));
    assert!(recorder.last().unwrap().contains(Events::WRITE));

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_peer_hangup_is_reported() {
    let port = start_port(2);
    let (writer, reader) = UnixStream::pair().unwrap();

    let recorder = Recorder::new();
    port.register(reader.as_raw_fd(), recorder.clone()).unwrap();
    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();

    drop(writer);

    assert!(wait_until(Duration::from_secs(2), || recorder.hits() == 1));
    let events = recorder.last().unwrap();
    assert!(events.intersects(Events::READ | Events::HANGUP));

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_register_replaces_previous_handler() {
    let port = start_port(2);
    let (mut writer, reader) = UnixStream::pair().unwrap();

    let first = Recorder::new();
    let second = Recorder::new();

    port.register(reader.as_raw_fd(), first.clone()).unwrap();
    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();

    // Replacing the registration disarms the interest armed for the old
    // handler; the new one starts unarmed.
    port.register(reader.as_raw_fd(), second.clone()).unwrap();
    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();

    writer.write_all(b"x").unwrap();

    assert!(wait_until(Duration::from_secs(2), || second.hits() == 1));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(first.hits(), 0);

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}
