//! End-to-end tests driving the real TCP path: a fake instrumented client
//! connects, sends a handshake and a raw (non-LZ4) event stream, and the
//! controller ingests it on the actual socket plumbing used in production.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use tracesrv::dispatch::EventType;
use tracesrv::query::Query;
use tracesrv::{Config, Controller};

fn write_handshake(stream: &mut TcpStream, lz4: bool) {
    stream.write_all(&100i64.to_le_bytes()).unwrap();
    stream.write_all(&1i64.to_le_bytes()).unwrap();
    stream.write_all(&1.0f64.to_le_bytes()).unwrap();
    let name = b"demo";
    stream.write_all(&(name.len() as u16).to_le_bytes()).unwrap();
    stream.write_all(name).unwrap();
    stream.write_all(&[lz4 as u8]).unwrap();
}

fn encode_zone_begin(buf: &mut Vec<u8>, srcloc: u64, time: i64) {
    buf.push(EventType::ZoneBegin as u8);
    buf.extend_from_slice(&srcloc.to_le_bytes());
    buf.extend_from_slice(&time.to_le_bytes());
}

fn encode_zone_end(buf: &mut Vec<u8>, time: i64) {
    buf.push(EventType::ZoneEnd as u8);
    buf.extend_from_slice(&time.to_le_bytes());
}

fn encode_thread_context(buf: &mut Vec<u8>, thread: u64) {
    buf.push(EventType::ThreadContext as u8);
    buf.extend_from_slice(&thread.to_le_bytes());
}

fn encode_frame_mark(buf: &mut Vec<u8>, time: i64) {
    buf.push(EventType::FrameMark as u8);
    buf.extend_from_slice(&time.to_le_bytes());
}

/// Reads and discards bytes until the peer closes or `budget` elapses, so a
/// subsequent drop doesn't leave unread data in the kernel buffer (which
/// would turn the close into a reset instead of a clean FIN).
fn drain_until_closed(stream: &mut TcpStream, budget: Duration) {
    stream.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
    let deadline = std::time::Instant::now() + budget;
    let mut buf = [0u8; 1024];
    while std::time::Instant::now() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => break,
        }
    }
}

#[test]
fn ingests_a_raw_session_over_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        write_handshake(&mut stream, false);

        let mut events = Vec::new();
        encode_thread_context(&mut events, 7);
        encode_zone_begin(&mut events, 1, 100);
        encode_zone_begin(&mut events, 2, 150);
        encode_zone_end(&mut events, 200);
        encode_zone_end(&mut events, 300);
        encode_frame_mark(&mut events, 300);
        stream.write_all(&events).unwrap();

        // Drain any outgoing queries (e.g. source-location lookups) the
        // server sends back; leaving them unread in the kernel buffer would
        // make the close() below send a reset instead of a clean FIN.
        drain_until_closed(&mut stream, Duration::from_millis(150));
    });

    let (server_stream, _) = listener.accept().unwrap();
    let cfg = Config { socket_poll_timeout_ms: 5, ..Config::default() };
    let controller = Controller::new(&cfg);

    // The peer closes after a short sleep; `run` returns once that happens.
    controller.run(server_stream, &cfg).unwrap();
    client.join().unwrap();

    assert!(controller.has_data());
    assert!(!controller.is_connected());

    let handshake = controller.handshake().unwrap();
    assert_eq!(handshake.capture_name, "demo");
    assert_eq!(handshake.timer_delay, 100);

    let trace = controller.trace().read();
    let query = Query::new(&trace);
    assert_eq!(query.zones_cnt(), 2);
    assert_eq!(query.last_time(), 300);

    let thread = query.threads().find(|t| t.thread_id == 7).unwrap();
    let root = &trace.zones[thread.root_timeline[0] as usize];
    assert_eq!((root.start, root.end), (100, 300));
}

#[test]
fn shutdown_request_is_observed_promptly() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        write_handshake(&mut stream, false);
        // No events; hold the connection open so only `shutdown()` ends the loop.
        drain_until_closed(&mut stream, Duration::from_millis(200));
    });

    let (server_stream, _) = listener.accept().unwrap();
    let cfg = Config { socket_poll_timeout_ms: 5, ..Config::default() };
    let controller = Controller::new(&cfg);

    let ctrl_for_shutdown = controller.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        ctrl_for_shutdown.shutdown();
    });

    let started = std::time::Instant::now();
    controller.run(server_stream, &cfg).unwrap();
    assert!(started.elapsed() < Duration::from_millis(200), "shutdown liveness bound violated (spec §8 property 7)");

    client.join().unwrap();
}
