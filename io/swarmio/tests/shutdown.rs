//! Lifecycle tests: graceful stop under load, idempotent run/stop.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use swarmio::{AcceptorPool, Config, EventHandler, endpoint};

struct Echo;

impl EventHandler for Echo {
    fn on_input(&self, fd: RawFd, data: &[u8]) {
        let _ = endpoint::write(fd, data);
    }
}

fn get_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn start_echo(port: u16, workers: usize) -> (Arc<AcceptorPool<Echo>>, thread::JoinHandle<()>) {
    let config = Config {
        workers,
        max_clients: 64,
        ..Config::default()
    };
    let pool = Arc::new(AcceptorPool::new(config, Echo).unwrap());
    assert!(pool.bind(port, 128));
    let runner = pool.clone();
    let handle = thread::spawn(move || runner.run().unwrap());
    thread::sleep(Duration::from_millis(100));
    (pool, handle)
}

#[test]
fn stop_under_load_joins_and_closes() {
    let port = get_available_port();
    let (pool, handle) = start_echo(port, 4);

    // 16 clients each streaming continuously until told to quit.
    let quit = Arc::new(AtomicBool::new(false));
    let mut clients = Vec::new();
    for _ in 0..16 {
        let quit = quit.clone();
        clients.push(thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_millis(200)))
                .unwrap();
            let payload = [0x5Au8; 512];
            let mut sink = [0u8; 512];
            while !quit.load(Ordering::Relaxed) {
                if stream.write_all(&payload).is_err() {
                    break;
                }
                let _ = stream.read(&mut sink);
            }
        }));
    }

    // Let traffic flow, then stop the server mid-stream.
    thread::sleep(Duration::from_millis(300));
    let stopped = Instant::now();
    pool.stop();
    assert!(
        stopped.elapsed() < Duration::from_secs(5),
        "stop took too long under load"
    );

    // The acceptor thread must come back once its reactor closes.
    handle.join().unwrap();

    quit.store(true, Ordering::Relaxed);
    for client in clients {
        client.join().unwrap();
    }

    // Every residual fd was closed on stop.
    assert_eq!(pool.clients().len() + pool.clients().free(), 64);
}

#[test]
fn stop_is_idempotent() {
    let port = get_available_port();
    let (pool, handle) = start_echo(port, 2);

    pool.stop();
    pool.stop();
    handle.join().unwrap();

    // A stopped pool refuses new connections outright: the listener fd is
    // closed, so connects are refused or reset.
    let connect = TcpStream::connect_timeout(
        &format!("127.0.0.1:{port}").parse().unwrap(),
        Duration::from_millis(500),
    );
    if let Ok(mut stream) = connect {
        let mut buf = [0u8; 1];
        stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        assert!(matches!(stream.read(&mut buf), Ok(0) | Err(_)));
    }
}

#[test]
fn run_is_idempotent() {
    let port = get_available_port();
    let (pool, handle) = start_echo(port, 2);

    // A second run on the already-running pool must not spawn more
    // workers; the echo path keeps working either way.
    pool.clients().run().unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream.write_all(b"still alive").unwrap();
    let mut received = [0u8; 11];
    stream.read_exact(&mut received).unwrap();
    assert_eq!(&received, b"still alive");

    drop(stream);
    pool.stop();
    handle.join().unwrap();
}
