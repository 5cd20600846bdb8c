use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use reactorio_driver::{backends::ReadinessDriver, Driver, DriverType, Event, HandleId, Interest, ReadinessKind, Trigger};

#[test]
fn readable_event_fires_when_peer_writes() {
    let (a, mut b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();

    let mut driver = ReadinessDriver::new(DriverType::default_reactor()).unwrap();
    let handle = HandleId::new(a.as_raw_fd());
    driver
        .add(handle, Interest::readable(Trigger::Level, false))
        .unwrap();

    b.write_all(b"hi").unwrap();

    let mut events = Vec::new();
    let n = driver
        .wait(&mut events, 8, Some(Duration::from_millis(200)))
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(events[0].handle(), handle);
}

#[test]
fn error_event_fires_on_refused_connection() {
    use socket2::{Domain, Socket, Type};
    use std::net::TcpListener;

    // A bound-then-dropped listener leaves the port refusing connections, so
    // a nonblocking connect to it resolves with `SO_ERROR` set to
    // `ECONNREFUSED`, surfaced as a writable readiness event.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    socket.set_nonblocking(true).unwrap();
    let _ = socket.connect(&addr.into());

    let mut driver = ReadinessDriver::new(DriverType::default_reactor()).unwrap();
    let handle = HandleId::new(socket.as_raw_fd());
    driver
        .add(handle, Interest::writable(Trigger::Level, false))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut events = Vec::new();
    let mut saw_error = false;
    while Instant::now() < deadline && !saw_error {
        events.clear();
        driver.wait(&mut events, 8, Some(Duration::from_millis(200))).unwrap();
        saw_error = events
            .iter()
            .any(|e| matches!(e, Event::Readiness { kind: ReadinessKind::Error, .. }));
    }
    assert!(saw_error, "expected a refused connection to surface as an error event");
}

#[test]
fn edge_trigger_on_level_only_backend_is_refused_when_unsupported() {
    let mut driver = ReadinessDriver::new(DriverType::Poll).unwrap();
    let (a, _b) = UnixStream::pair().unwrap();
    let handle = HandleId::new(a.as_raw_fd());
    let result = driver.add(handle, Interest::readable(Trigger::Edge, false));
    assert!(result.is_err());
}
