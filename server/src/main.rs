//! swarmio echo server binary.

mod config;
mod logging;
mod signal;

use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;

use config::Config;
use swarmio::{AcceptorPool, EventHandler, endpoint};

#[derive(Parser)]
#[command(name = "swarmio-server")]
#[command(about = "High-concurrency TCP echo server")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

/// Echoes input back to the peer; urgent bytes are only logged.
struct Echo;

impl EventHandler for Echo {
    fn on_input(&self, fd: RawFd, data: &[u8]) {
        let _ = endpoint::write(fd, data);
    }

    fn on_oob(&self, fd: RawFd, byte: u8) {
        tracing::info!(fd, byte, "urgent byte received");
    }
}

const DEFAULT_CONFIG: &str = r#"# swarmio echo server configuration

[workers]
# Number of worker threads. 0 = number of CPUs.
threads = 0

[engine]
# Maximum simultaneously connected clients.
max_clients = 200000
# TCP listen backlog.
backlog = 100000

[[listener]]
port = 60008

[logging]
# Level filter used when RUST_LOG is not set.
level = "info"
# "pretty" or "json".
format = "pretty"
timestamps = true
thread_names = true
"#;

fn main() {
    let args = Args::parse();

    if args.print_config {
        print!("{DEFAULT_CONFIG}");
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    logging::init(&config.logging);

    if let Err(e) = run(config) {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let engine_config = swarmio::Config {
        workers: config.workers.threads,
        max_clients: config.engine.max_clients,
        backlog: config.engine.backlog,
    };

    let pool = Arc::new(AcceptorPool::new(engine_config, Echo)?);

    let mut bound = 0;
    for port in config.ports() {
        if pool.bind(port, config.engine.backlog) {
            tracing::info!(port, "listening");
            bound += 1;
        } else {
            tracing::warn!(port, "failed to bind");
        }
    }
    if bound == 0 {
        return Err("no listener could be bound".into());
    }

    let shutdown = signal::install_signal_handler();

    let runner = pool.clone();
    let acceptor = std::thread::Builder::new()
        .name("swarmio-acceptor".to_string())
        .spawn(move || runner.run())?;

    tracing::info!(
        max_clients = pool.clients().capacity(),
        "server running, ctrl-c to stop"
    );

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    pool.stop();
    acceptor
        .join()
        .map_err(|_| "acceptor thread panicked")??;

    tracing::info!("shutdown complete");
    Ok(())
}
