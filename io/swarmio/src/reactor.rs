//! Edge-triggered readiness reactor.
//!
//! Wraps one epoll instance plus a wake eventfd for shutdown. The same
//! mechanism serves listener and connection fds: [`Dispatch`] supplies
//! the cast from the kernel's user-data word to the owner's native
//! reference and the event processing itself, so the acceptor pool and
//! the connection pool each specialise the reactor without any dynamic
//! type checks on the hot path.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Error;

/// Upper bound on events drained per `epoll_wait` call.
const EVENT_BUDGET: usize = 1024;

/// User-data word reserved for the wake eventfd; fds and slot pointers
/// never collide with it.
const WAKE_TOKEN: u64 = u64::MAX;

/// Interest mask for connections: readable, urgent, and peer hang-up, in
/// edge-triggered one-shot mode so at most one worker holds an fd.
const CLIENT_EVENTS: u32 =
    (libc::EPOLLIN | libc::EPOLLPRI | libc::EPOLLRDHUP | libc::EPOLLET | libc::EPOLLONESHOT) as u32;

/// Interest mask for listeners. Exclusive wake-up in place of one-shot:
/// the kernel rejects EPOLLEXCLUSIVE | EPOLLONESHOT, and the accept loop
/// drains the backlog anyway.
const LISTENER_EVENTS: u32 = (libc::EPOLLIN | libc::EPOLLET | libc::EPOLLEXCLUSIVE) as u32;

/// Converts kernel event payloads into a native reference and consumes
/// readiness events.
pub(crate) trait Dispatch {
    type Target;

    /// Convert the kernel-supplied user-data word.
    fn cast(data: u64) -> Self::Target;

    /// Consume one readiness event.
    fn process(&self, target: Self::Target, flags: u32);
}

pub(crate) struct Reactor {
    epfd: RawFd,
    wakefd: RawFd,
    closed: AtomicBool,
}

impl Reactor {
    pub fn new() -> Result<Self, Error> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        let wakefd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if wakefd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epfd) };
            return Err(Error::Io(err));
        }

        // Level-triggered and never drained: once written, every waiter
        // keeps waking until it observes the closed flag and returns.
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        if unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, wakefd, &mut ev) } < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(wakefd);
                libc::close(epfd);
            }
            return Err(Error::Io(err));
        }

        Ok(Reactor {
            epfd,
            wakefd,
            closed: AtomicBool::new(false),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, data: u64) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: data };
        if unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Register a listener; the event payload carries the fd itself.
    pub fn add_listener(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, LISTENER_EVENTS, fd as u64)
    }

    /// Register a connection; the event payload carries `token`, a slot
    /// address.
    pub fn add_client(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, CLIENT_EVENTS, token)
    }

    /// Re-enable a one-shot registration after a drain hit would-block.
    pub fn rearm(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, CLIENT_EVENTS, token)
    }

    /// Deregister `fd`.
    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
    }

    /// Block dispatching readiness events until [`close`](Self::close).
    ///
    /// Any number of threads may wait on the same reactor; one-shot
    /// registrations keep them from processing the same fd concurrently.
    pub fn wait<D: Dispatch>(&self, dispatch: &D) {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; EVENT_BUDGET];

        loop {
            if self.closed.load(Ordering::Acquire) {
                return;
            }

            let n = unsafe {
                libc::epoll_wait(self.epfd, events.as_mut_ptr(), EVENT_BUDGET as i32, -1)
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                if !self.closed.load(Ordering::Acquire) {
                    tracing::error!("epoll_wait failed: {err}");
                }
                return;
            }

            for ev in &events[..n as usize] {
                let data = ev.u64;
                if data == WAKE_TOKEN {
                    continue;
                }
                dispatch.process(D::cast(data), ev.events);
            }
        }
    }

    /// Whether [`close`](Self::close) has been observed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the reactor terminal and unblock every waiter.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let val: u64 = 1;
        // Safety: wakefd stays open for the reactor's lifetime.
        unsafe {
            libc::write(self.wakefd, &val as *const u64 as *const libc::c_void, 8);
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wakefd);
            libc::close(self.epfd);
        }
    }
}
