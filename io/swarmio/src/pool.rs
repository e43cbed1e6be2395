//! The connection pool: slab, freelist, workers, and event dispatch.
//!
//! Connection state lives in a slab allocated once at startup; a
//! lock-free queue of slot addresses serves as the freelist. Admission
//! dequeues a slot and registers its address as the epoll payload;
//! release reverses both. Worker threads all block in the same reactor,
//! and one-shot arming guarantees a single worker per armed slot, so the
//! only shared mutable state is the freelist and one atomic counter.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::Config;
use crate::endpoint;
use crate::error::Error;
use crate::handler::EventHandler;
use crate::metrics;
use crate::mirror::MirrorRegion;
use crate::queue::AtomicQueue;
use crate::reactor::{Dispatch, Reactor};
use crate::slot::{ClientSlot, MAX_READ_SIZE};

pub struct ClientPool<H: EventHandler> {
    slab: MirrorRegion<ClientSlot>,
    unused: AtomicQueue<ClientSlot>,
    reactor: Reactor,
    handler: H,
    // Held only for start/stop transitions, never during event handling.
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    nworkers: usize,
    clientcap: usize,
    clientsize: AtomicUsize,
}

impl<H: EventHandler> ClientPool<H> {
    /// Allocate the slab and freelist and create the reactor. No threads
    /// are spawned until [`run`](Self::run).
    pub fn new(config: &Config, handler: H) -> Result<Arc<Self>, Error> {
        if config.max_clients == 0 {
            return Err(Error::InvalidCapacity);
        }
        let clientcap = config.max_clients;

        let slab = MirrorRegion::<ClientSlot>::alloc(clientcap)?;
        // Ring strictly larger than the live set keeps the cursor
        // arithmetic in `len` unambiguous.
        let unused = AtomicQueue::with_capacity(clientcap + 1)?;
        // memfd pages are zero-filled, so every slot already carries the
        // free sentinel fd.
        for i in 0..clientcap {
            unsafe { unused.enqueue(slab.at(i)) };
        }

        Ok(Arc::new(ClientPool {
            slab,
            unused,
            reactor: Reactor::new()?,
            handler,
            workers: Mutex::new(Vec::new()),
            nworkers: config.resolved_workers(),
            clientcap,
            clientsize: AtomicUsize::new(0),
        }))
    }

    /// Admit a connected, non-blocking fd into the pool.
    ///
    /// Returns false when the pool is at capacity or registration fails;
    /// the caller keeps ownership of a rejected fd.
    pub fn admit(&self, fd: RawFd) -> bool {
        // A stopping pool takes no new work; its slab sweep must not race
        // a late admission.
        if self.reactor.is_closed() {
            return false;
        }
        let mut size = self.clientsize.load(Ordering::Acquire);
        loop {
            if size == self.clientcap {
                metrics::CONNECTIONS_DROPPED.increment();
                return false;
            }
            match self.clientsize.compare_exchange_weak(
                size,
                size + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => size = observed,
            }
        }

        let slot = self.unused.dequeue();
        debug_assert!(!slot.is_null());
        // Safety: the dequeue made this slot ours; no worker holds it.
        unsafe { (*slot).fd = fd };

        if let Err(err) = self.reactor.add_client(fd, slot as u64) {
            tracing::warn!(fd, "failed to register connection: {err}");
            unsafe { (*slot).fd = 0 };
            self.unused.enqueue(slot);
            self.clientsize.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        metrics::CONNECTIONS_OPEN.increment();
        true
    }

    /// Spawn the worker set. Idempotent: a running pool is left alone.
    pub fn run(self: &Arc<Self>) -> Result<(), Error> {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            return Ok(());
        }
        for i in 0..self.nworkers {
            let pool = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("swarmio-worker-{i}"))
                .spawn(move || pool.reactor.wait(&*pool))
                .map_err(Error::Io)?;
            workers.push(handle);
        }
        tracing::debug!(workers = self.nworkers, "connection pool running");
        Ok(())
    }

    /// Close the reactor, join the workers, and close every live fd left
    /// in the slab. Safe to call more than once.
    pub fn stop(&self) {
        let mut workers = self.workers.lock().unwrap();
        if workers.is_empty() {
            return;
        }
        self.reactor.close();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        // No worker is left; residual occupied slots still hold live fds.
        for i in 0..self.clientcap {
            // Safety: i < capacity, and all workers have joined.
            let slot = unsafe { self.slab.at(i) };
            let fd = unsafe { (*slot).fd };
            if fd != 0 {
                endpoint::close(fd);
                unsafe { (*slot).fd = 0 };
            }
        }
        tracing::debug!("connection pool stopped");
    }

    /// Number of currently admitted connections.
    pub fn len(&self) -> usize {
        self.clientsize.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admission cap.
    pub fn capacity(&self) -> usize {
        self.clientcap
    }

    /// Number of free slots on the freelist.
    pub fn free(&self) -> usize {
        self.unused.len()
    }

    /// The application handler driving this pool's callbacks.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Deregister, close, and return the slot to the freelist.
    fn release(&self, slot: *mut ClientSlot) {
        let fd = unsafe { (*slot).fd };
        let _ = self.reactor.remove(fd);
        endpoint::close(fd);
        unsafe { (*slot).fd = 0 };
        // The freelist's release store publishes the sentinel write to
        // whichever thread dequeues this slot next.
        self.unused.enqueue(slot);
        self.clientsize.fetch_sub(1, Ordering::AcqRel);
        metrics::CONNECTIONS_RELEASED.increment();
        metrics::CONNECTIONS_OPEN.decrement();
    }

    /// Drain normal input until the socket would block.
    ///
    /// Returns false if the slot was released (peer close or error).
    fn drain_input(&self, slot: *mut ClientSlot) -> bool {
        loop {
            let fd = unsafe { (*slot).fd };
            // Safety: one-shot arming means this worker alone holds the
            // slot until rearm or release.
            let buf = unsafe { &mut (&mut (*slot).buf)[..MAX_READ_SIZE] };
            match endpoint::read(fd, buf) {
                Ok(0) => {
                    // Peer closed the stream.
                    self.release(slot);
                    return false;
                }
                Ok(n) => self.handler.on_input(fd, unsafe { &(&(*slot).buf)[..n] }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.reactor.rearm(fd, slot as u64).is_err() {
                        self.release(slot);
                        return false;
                    }
                    return true;
                }
                Err(_) => {
                    self.release(slot);
                    return false;
                }
            }
        }
    }

    /// Drain urgent data, interleaving one normal-read step per iteration
    /// as the urgent mark advances.
    ///
    /// Returns false if the slot was released.
    fn drain_urgent(&self, slot: *mut ClientSlot) -> bool {
        loop {
            let fd = unsafe { (*slot).fd };
            match endpoint::at_mark(fd) {
                Ok(true) => match endpoint::read_oob(fd) {
                    Ok(byte) => {
                        metrics::OOB_BYTES.increment();
                        self.handler.on_oob(fd, byte);
                    }
                    Err(_) => {
                        self.release(slot);
                        return false;
                    }
                },
                Ok(false) => {}
                Err(_) => {
                    self.release(slot);
                    return false;
                }
            }

            // One normal-read step, exactly as in drain_input; the kernel
            // never returns data past the mark in a single read.
            let buf = unsafe { &mut (&mut (*slot).buf)[..MAX_READ_SIZE] };
            match endpoint::read(fd, buf) {
                Ok(0) => {
                    self.release(slot);
                    return false;
                }
                Ok(n) => self.handler.on_input(fd, unsafe { &(&(*slot).buf)[..n] }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.reactor.rearm(fd, slot as u64).is_err() {
                        self.release(slot);
                        return false;
                    }
                    return true;
                }
                Err(_) => {
                    self.release(slot);
                    return false;
                }
            }
        }
    }
}

const IN: u32 = libc::EPOLLIN as u32;
const PRI: u32 = libc::EPOLLPRI as u32;
const OUT: u32 = libc::EPOLLOUT as u32;
const ERR: u32 = libc::EPOLLERR as u32;
const HUP: u32 = (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32;

impl<H: EventHandler> Dispatch for ClientPool<H> {
    type Target = *mut ClientSlot;

    fn cast(data: u64) -> *mut ClientSlot {
        data as *mut ClientSlot
    }

    /// Reduce the observed flag set to one canonical action.
    fn process(&self, slot: *mut ClientSlot, flags: u32) {
        // The socket's state is unknown after an error; release no matter
        // what else is set.
        if flags & ERR != 0 {
            self.release(slot);
            return;
        }
        // Hang-up with nothing left to read.
        if flags & HUP != 0 && flags & (IN | PRI) == 0 {
            self.release(slot);
            return;
        }

        let survived = if flags & PRI != 0 {
            // Urgent drain also consumes normal input.
            self.drain_urgent(slot)
        } else if flags & IN != 0 {
            self.drain_input(slot)
        } else if flags & OUT != 0 {
            let fd = unsafe { (*slot).fd };
            self.handler.on_write_ready(fd);
            if self.reactor.rearm(fd, slot as u64).is_err() {
                self.release(slot);
            }
            return;
        } else {
            return;
        };

        // A drain that released the slot must not dispatch further.
        if survived && flags & OUT != 0 {
            let fd = unsafe { (*slot).fd };
            self.handler.on_write_ready(fd);
        }
    }
}
