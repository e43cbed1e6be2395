//! The acceptor pool: listener ownership, the accept loop, admission.

use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::endpoint;
use crate::error::Error;
use crate::handler::EventHandler;
use crate::metrics;
use crate::pool::ClientPool;
use crate::reactor::{Dispatch, Reactor};

/// Owns listening sockets and installs accepted connections into a
/// [`ClientPool`].
///
/// `run` blocks the calling thread in the acceptor's own reactor; `stop`
/// may be called from any other thread, so the pool is typically held in
/// an `Arc`.
pub struct AcceptorPool<H: EventHandler> {
    clients: Arc<ClientPool<H>>,
    reactor: Reactor,
    // Listeners bound by this pool; closed on stop. Adopted fds are the
    // caller's and never land here.
    owned: Mutex<Vec<RawFd>>,
}

impl<H: EventHandler> AcceptorPool<H> {
    pub fn new(config: Config, handler: H) -> Result<Self, Error> {
        Ok(AcceptorPool {
            clients: ClientPool::new(&config, handler)?,
            reactor: Reactor::new()?,
            owned: Mutex::new(Vec::new()),
        })
    }

    /// Bind a listener on `port` and register it. Returns false on
    /// failure; the server stays usable either way.
    pub fn bind(&self, port: u16, backlog: i32) -> bool {
        let fd = match endpoint::tcp_server(port, backlog) {
            Ok(fd) => fd,
            Err(err) => {
                tracing::warn!(port, "listener setup failed: {err}");
                return false;
            }
        };
        if let Err(err) = endpoint::set_nonblocking(fd).and_then(|()| self.reactor.add_listener(fd))
        {
            tracing::warn!(port, "listener registration failed: {err}");
            endpoint::close(fd);
            return false;
        }
        self.owned.lock().unwrap().push(fd);
        tracing::debug!(port, "listening");
        true
    }

    /// Register an externally-created listening socket.
    ///
    /// The fd must already be bound, listening, and non-blocking. The
    /// caller retains ownership and may share the fd across acceptor
    /// instances; exclusive wake-up keeps accept storms down.
    pub fn adopt(&self, fd: RawFd) -> bool {
        match self.reactor.add_listener(fd) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(fd, "failed to adopt listener: {err}");
                false
            }
        }
    }

    /// Start the connection pool's workers, then drive the accept loop on
    /// the calling thread until [`stop`](Self::stop).
    pub fn run(&self) -> Result<(), Error> {
        self.clients.run()?;
        self.reactor.wait(self);
        Ok(())
    }

    /// Unblock `run`, stop the workers, and close the bound listeners.
    /// Safe to call more than once.
    pub fn stop(&self) {
        self.reactor.close();
        self.clients.stop();
        let mut owned = self.owned.lock().unwrap();
        for fd in owned.drain(..) {
            endpoint::close(fd);
        }
    }

    /// The connection pool this acceptor installs into.
    pub fn clients(&self) -> &Arc<ClientPool<H>> {
        &self.clients
    }
}

impl<H: EventHandler> Dispatch for AcceptorPool<H> {
    type Target = RawFd;

    fn cast(data: u64) -> RawFd {
        data as RawFd
    }

    fn process(&self, fd: RawFd, _flags: u32) {
        // Edge-triggered: drain the whole backlog before returning.
        loop {
            let cfd = match endpoint::accept(fd) {
                Ok(cfd) => cfd,
                Err(err) => {
                    if err.kind() != io::ErrorKind::WouldBlock {
                        tracing::debug!(fd, "accept failed: {err}");
                    }
                    return;
                }
            };
            metrics::CONNECTIONS_ACCEPTED.increment();
            if endpoint::set_nonblocking(cfd).is_err() || !self.clients.admit(cfd) {
                // Back-pressure by drop: the excess client sees a reset.
                endpoint::close(cfd);
            }
        }
    }
}
