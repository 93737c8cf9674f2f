use portmux::pool::FixedPool;
use portmux::{EventHandler, Events, Port, PortBuilder, PortError};

use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

struct Noop;

impl EventHandler for Noop {
    fn on_event(&self, _events: Events, _pooled: bool) {}
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
fn test_close_wakes_every_idle_worker() {
    let port = start_port(4);

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_close_is_idempotent() {
    let port = start_port(2);

    port.close();
    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_close_before_start_releases_immediately() {
    let pool = Arc::new(FixedPool::new());
    let port = PortBuilder::new()
        .worker_threads(2)
        .build(pool)
        .unwrap();

    port.close();
    assert!(port.await_termination(Duration::from_millis(100)));
}

#[test]
fn test_work_rejected_after_close() {
    let port = start_port(1);
    let (_writer, reader) = UnixStream::pair().unwrap();

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
    assert!(port.is_shutdown());

    assert_eq!(
        port.register(reader.as_raw_fd(), Arc::new(Noop)).unwrap_err(),
        PortError::Rejected
    );
    assert_eq!(
        port.update_interest(reader.as_raw_fd(), Events::READ)
            .unwrap_err(),
        PortError::Rejected
    );
    assert_eq!(
        port.execute(Box::new(|| {})).unwrap_err(),
        PortError::Rejected
    );
    assert_eq!(
        port.deregister(reader.as_raw_fd()).unwrap_err(),
        PortError::Rejected
    );
    assert_eq!(port.start().unwrap_err(), PortError::Rejected);
}

#[test]
fn test_await_termination_times_out_while_running() {
    let port = start_port(1);

    assert!(!port.await_termination(Duration::from_millis(50)));

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_await_termination_accepts_unbounded_timeout() {
    let pool = Arc::new(FixedPool::new());
    let port = PortBuilder::new()
        .worker_threads(2)
        .build(pool)
        .unwrap();

    // A port closed before start is already terminated; the largest
    // possible timeout still returns right away.
    port.close();
    assert!(port.await_termination(Duration::MAX));
}

#[test]
fn test_unbounded_await_termination_returns_on_close() {
    let port = start_port(2);

    let closer = {
        let port = port.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            port.close();
        })
    };

    assert!(port.await_termination(Duration::MAX));
    closer.join().unwrap();
}

#[test]
fn test_injected_tasks_run_on_named_pool_threads() {
    let port = start_port(2);

    let ran = Arc::new(AtomicUsize::new(0));
    let on_pool = Arc::new(AtomicBool::new(true));

    for _ in 0..5 {
        let ran = ran.clone();
        let on_pool = on_pool.clone();
        port.execute(Box::new(move || {
            let named = thread::current()
                .name()
                .is_some_and(|name| name.starts_with("port-worker"));
            if !named {
                on_pool.store(false, Ordering::SeqCst);
            }
            ran.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || {
        ran.load(Ordering::SeqCst) == 5
    }));
    assert!(on_pool.load(Ordering::SeqCst));

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_close_waits_out_a_busy_handler() {
    struct Slow {
        entered: AtomicBool,
    }

    impl EventHandler for Slow {
        fn on_event(&self, _events: Events, _pooled: bool) {
            self.entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
        }
    }

    let port = start_port(2);
    let (mut writer, reader) = UnixStream::pair().unwrap();

    let slow = Arc::new(Slow {
        entered: AtomicBool::new(false),
    });
    port.register(reader.as_raw_fd(), slow.clone()).unwrap();
    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();
    writer.write_all(b"x").unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        slow.entered.load(Ordering::SeqCst)
    }));

    // Close lands while the handler still occupies its thread; the port
    // only terminates once that thread has drained its wakeup.
    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_no_delivery_after_close() {
    let port = start_port(2);
    let (mut writer, reader) = UnixStream::pair().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));

    struct Counting(Arc<AtomicUsize>);
    impl EventHandler for Counting {
        fn on_event(&self, _events: Events, _pooled: bool) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    port.register(reader.as_raw_fd(), Arc::new(Counting(hits.clone())))
        .unwrap();
    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));

    writer.write_all(b"x").unwrap();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_deregister_works_while_running() {
    let port = start_port(1);
    let (_writer, reader) = UnixStream::pair().unwrap();

    port.register(reader.as_raw_fd(), Arc::new(Noop)).unwrap();
    port.update_interest(reader.as_raw_fd(), Events::READ)
        .unwrap();

    assert_eq!(port.deregister(reader.as_raw_fd()), Ok(()));
    assert_eq!(
        port.deregister(reader.as_raw_fd()).unwrap_err(),
        PortError::Unregistered
    );

    port.close();
    assert!(port.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_many_ports_share_one_process() {
    let ports: Vec<Port> = (0..3).map(|_| start_port(2)).collect();

    for port in &ports {
        assert!(!port.is_shutdown());
        port.close();
    }
    for port in &ports {
        assert!(port.await_termination(Duration::from_secs(5)));
    }
}
