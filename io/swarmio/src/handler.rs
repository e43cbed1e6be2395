//! The application callback surface.

use std::os::fd::RawFd;

/// Callbacks invoked by pool workers as connections become ready.
///
/// One-shot arming guarantees at most one worker inside a callback per
/// fd, but callbacks for distinct fds run concurrently; implementations
/// must be re-entrant across fds. Every method defaults to a no-op.
pub trait EventHandler: Send + Sync + 'static {
    /// Bytes most recently read from `fd`. The slice is only valid for
    /// the duration of the call.
    fn on_input(&self, fd: RawFd, data: &[u8]) {
        let _ = (fd, data);
    }

    /// `fd` transitioned to writable.
    fn on_write_ready(&self, fd: RawFd) {
        let _ = fd;
    }

    /// One out-of-band byte arrived on `fd`.
    fn on_oob(&self, fd: RawFd, byte: u8) {
        let _ = (fd, byte);
    }
}
