//! Out-of-band delivery.
//!
//! TCP urgent data has no portable std surface, so the client side sends
//! with `libc::send(MSG_OOB)` on the stream's raw fd.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use swarmio::{AcceptorPool, Config, EventHandler, endpoint};

/// Echoes normal input and records every urgent byte it sees.
struct OobRecorder {
    oob: Mutex<Vec<u8>>,
    oob_calls: AtomicU32,
}

impl EventHandler for OobRecorder {
    fn on_input(&self, fd: RawFd, data: &[u8]) {
        let _ = endpoint::write(fd, data);
    }

    fn on_oob(&self, _fd: RawFd, byte: u8) {
        self.oob.lock().unwrap().push(byte);
        self.oob_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn get_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn send_oob(stream: &TcpStream, byte: u8) {
    let n = unsafe {
        libc::send(
            stream.as_raw_fd(),
            &byte as *const u8 as *const libc::c_void,
            1,
            libc::MSG_OOB,
        )
    };
    assert_eq!(n, 1, "MSG_OOB send failed");
}

#[test]
fn urgent_byte_is_delivered_once() {
    let port = get_available_port();
    let handler = OobRecorder {
        oob: Mutex::new(Vec::new()),
        oob_calls: AtomicU32::new(0),
    };
    let config = Config {
        workers: 2,
        max_clients: 4,
        ..Config::default()
    };
    let pool = Arc::new(AcceptorPool::new(config, handler).unwrap());
    assert!(pool.bind(port, 16));
    let runner = pool.clone();
    let handle = thread::spawn(move || runner.run().unwrap());
    thread::sleep(Duration::from_millis(100));

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    send_oob(&stream, 0xFF);

    // Wait for the urgent byte to land.
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        if pool.clients().handler().oob_calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    // Normal bytes after the mark still arrive in order.
    stream.write_all(b"after").unwrap();
    let mut received = [0u8; 5];
    stream.read_exact(&mut received).unwrap();
    assert_eq!(&received, b"after");

    let recorder = pool.clients().handler();
    assert_eq!(recorder.oob_calls.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.oob.lock().unwrap().as_slice(), &[0xFF]);

    drop(stream);
    pool.stop();
    handle.join().unwrap();
}
