use std::io::BufRead;
use std::os::fd::RawFd;
use std::sync::Arc;

use swarmio::{AcceptorPool, Config, EventHandler, endpoint};

struct Echo;

impl EventHandler for Echo {
    fn on_input(&self, fd: RawFd, data: &[u8]) {
        // Just echo the message back.
        let _ = endpoint::write(fd, data);
    }
}

fn main() {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(60008);

    let config = Config {
        workers: 10,
        max_clients: 200_000,
        ..Config::default()
    };

    let pool = Arc::new(AcceptorPool::new(config, Echo).expect("failed to build pool"));
    if !pool.bind(port, 100_000) {
        eprintln!("server socket creation error on port {port}");
        std::process::exit(1);
    }

    eprintln!("echo server listening on port {port}; 'x' + enter to quit");

    let runner = pool.clone();
    let thread = std::thread::spawn(move || runner.run());

    for line in std::io::stdin().lock().lines() {
        match line {
            Ok(l) if l.trim().eq_ignore_ascii_case("x") => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    pool.stop();
    let _ = thread.join();
}
