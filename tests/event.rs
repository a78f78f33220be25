use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pollable_event::{Error, Event, EventKind};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn signal_event() -> Event {
    init_logger();
    Event::new(EventKind::Signal).unwrap()
}

#[test]
fn test_default_is_null() {
    let event = Event::default();
    assert!(event.is_null());
    assert!(!event.is_valid());
    assert_eq!(event.kind(), EventKind::Dummy);
    assert!(!event.test());
    assert!(event.pollable().is_none());
}

#[test]
fn test_created_event_is_unsignaled() {
    let event = signal_event();
    assert!(event.is_valid());
    assert_eq!(event.kind(), EventKind::Signal);
    assert!(!event.test());
}

#[test]
fn test_set_test_reset() {
    let event = signal_event();
    assert!(!event.test());

    event.set().unwrap();
    assert!(event.test());

    event.reset().unwrap();
    assert!(!event.test());
}

#[test]
fn test_repeated_set_coalesces() {
    let event = signal_event();
    for _ in 0..1000 {
        event.set().unwrap();
        assert!(event.test());
    }

    event.reset().unwrap();
    assert!(!event.test());
}

#[test]
fn test_double_set_single_reset() {
    let event = signal_event();
    event.set().unwrap();
    event.set().unwrap();
    event.reset().unwrap();
    assert!(!event.test());
}

#[test]
fn test_observing_does_not_consume() {
    let event = signal_event();
    event.set().unwrap();

    for _ in 0..10 {
        assert!(event.test());
        assert!(event.wait(Duration::ZERO));
        assert!(event.wait_ms(10));
        assert!(event.wait_for(Duration::from_millis(10)).unwrap());
    }
    assert!(event.test());
}

#[test]
fn test_wait_zero_matches_test() {
    let mut event = signal_event();
    assert_eq!(event.wait(Duration::ZERO), event.test());
    event.set().unwrap();
    assert_eq!(event.wait(Duration::ZERO), event.test());
    event.reset().unwrap();
    assert_eq!(event.wait(Duration::ZERO), event.test());
    event.close();
    assert_eq!(event.wait(Duration::ZERO), event.test());
}

#[test]
fn test_wait_times_out() {
    let event = signal_event();

    let start = Instant::now();
    assert!(!event.wait_ms(100));
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(90),
        "Wait returned too early: {:?}",
        elapsed
    );
    assert!(matches!(event.wait_for(Duration::from_millis(10)), Ok(false)));
}

#[test]
fn test_cross_thread_wake() {
    let event = Arc::new(signal_event());

    let thread = {
        let event = event.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            event.set().unwrap();
        })
    };

    let start = Instant::now();
    assert!(event.wait(Duration::from_millis(5000)));
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_millis(2500),
        "Wait returned too late: {:?}",
        elapsed
    );
    // Still signaled after the wake.
    assert!(event.test());

    thread.join().unwrap();
}

#[test]
fn test_set_before_wait_returns_promptly() {
    let event = signal_event();
    event.set().unwrap();

    let start = Instant::now();
    assert!(event.wait(Duration::from_secs(5)));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_concurrent_set_then_reset() {
    let event = Arc::new(signal_event());

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let event = event.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    event.set().unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert!(event.test());
    event.reset().unwrap();
    assert!(!event.test());
}

#[test]
fn test_close_is_idempotent() {
    let mut event = signal_event();
    event.set().unwrap();

    event.close();
    assert!(event.is_null());
    event.close();
    assert!(event.is_null());

    let mut never_created = Event::null();
    never_created.close();
    assert!(never_created.is_null());
}

#[test]
fn test_operations_on_closed_event() {
    let mut event = signal_event();
    event.close();

    assert!(!event.is_valid());
    assert!(matches!(event.set(), Err(Error::Null)));
    assert!(matches!(event.reset(), Err(Error::Null)));
    assert!(matches!(event.wait_for(Duration::ZERO), Err(Error::Null)));
    assert!(!event.test());
    assert!(!event.wait_ms(10));
}

#[test]
fn test_create_rejects_other_kinds() {
    init_logger();
    for kind in [EventKind::Dummy, EventKind::Read, EventKind::Write] {
        let mut event = Event::null();
        assert!(matches!(event.create(kind), Err(Error::UnsupportedKind(k)) if k == kind));
        assert!(event.is_null());
        assert!(Event::new(kind).is_err());
    }
}

#[test]
fn test_rejected_create_keeps_previous_kind() {
    init_logger();
    let mut event = Event::null();
    assert!(event.create(EventKind::Write).is_err());
    assert!(event.is_null());
    assert_eq!(event.kind(), EventKind::Dummy);
}

#[test]
fn test_create_replaces_channel() {
    let mut event = signal_event();
    event.set().unwrap();

    event.create(EventKind::Signal).unwrap();
    assert!(event.is_valid());
    assert!(!event.test());

    event.close();
    event.create(EventKind::Signal).unwrap();
    event.set().unwrap();
    assert!(event.test());
}

#[cfg(unix)]
mod unix {
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use pollable_event::{Error, Event, EventKind};

    use super::signal_event;

    #[test]
    fn test_read_source() {
        super::init_logger();
        let (mut local, remote) = UnixStream::pair().unwrap();
        let mut event = unsafe { Event::from_raw_source(remote.as_raw_fd(), EventKind::Read) };
        assert!(event.is_valid());
        assert!(!event.test());

        local.write_all(b"x").unwrap();
        for _ in 0..3 {
            assert!(event.test());
        }

        assert!(matches!(event.set(), Err(Error::ReadOnly)));
        assert!(matches!(event.reset(), Err(Error::ReadOnly)));
        // Neither call touched the socket's data.
        let mut buf = [0u8; 1];
        (&remote).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");

        event.close();
        assert!(event.is_null());
        // The socket is still open.
        local.write_all(b"y").unwrap();
        (&remote).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"y");
    }

    #[test]
    fn test_source_requires_read_only_kind() {
        super::init_logger();
        let (mut local, remote) = UnixStream::pair().unwrap();
        local.write_all(b"x").unwrap();

        for kind in [EventKind::Dummy, EventKind::Signal] {
            let event = unsafe { Event::from_raw_source(remote.as_raw_fd(), kind) };
            assert!(!event.is_valid(), "{:?} wrapped a source", kind);
            assert_eq!(event.kind(), EventKind::Dummy);
            assert!(!event.test());
            assert!(matches!(event.set(), Err(Error::Null)));
        }

        // The socket is readable and untouched.
        let mut buf = [0u8; 1];
        (&remote).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn test_write_source() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let event = unsafe { Event::from_raw_source(local.as_raw_fd(), EventKind::Write) };
        assert!(event.test());
    }

    #[test]
    fn test_poll_multiple_descriptors() {
        let idle = signal_event();
        let signaled = signal_event();
        signaled.set().unwrap();

        let mut pollfds = [
            libc::pollfd {
                fd: idle.pollable().unwrap().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: signaled.pollable().unwrap().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), 2, 1000) };
        assert_eq!(ret, 1);
        assert_eq!(pollfds[0].revents, 0);
        assert_ne!(pollfds[1].revents & libc::POLLIN, 0);

        // External polling leaves the state alone.
        assert!(signaled.test());
    }

    #[tokio::test]
    async fn test_tokio() {
        let event = Arc::new(signal_event());

        let async_fd =
            tokio::io::unix::AsyncFd::new(event.pollable().unwrap().as_raw_fd()).unwrap();

        for i in 0..3 {
            assert!(
                !event.test(),
                "Event should not be signaled at start of iteration {}",
                i
            );

            let event_clone = event.clone();
            let thread = thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                event_clone.set().unwrap();
            });

            let mut guard = async_fd.readable().await.unwrap();
            assert!(event.test());

            event.reset().unwrap();
            guard.clear_ready();

            thread.join().unwrap();
        }
    }
}
