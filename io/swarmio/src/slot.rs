//! Per-connection state records.

use std::os::fd::RawFd;

/// Largest single read handed to `on_input`, in bytes.
pub const MAX_READ_SIZE: usize = 4096;

/// One connection's fixed state: the fd and its read buffer.
///
/// A slot's identity is its address in the slab; the reactor's event
/// payload carries that address, so event lookup is a cast, not a map
/// probe. `fd == 0` marks the slot free. The buffer carries one guard
/// byte past `MAX_READ_SIZE`.
pub(crate) struct ClientSlot {
    pub fd: RawFd,
    pub buf: [u8; MAX_READ_SIZE + 1],
}
