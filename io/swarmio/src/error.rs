use std::fmt;
use std::io;

/// Errors returned by the swarmio engine.
#[derive(Debug)]
pub enum Error {
    /// A socket, epoll, or eventfd syscall failed.
    Io(io::Error),
    /// A double-mapped memory region could not be created.
    Allocation(io::Error),
    /// A capacity of zero was requested.
    InvalidCapacity,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Allocation(e) => write!(f, "allocation failed: {e}"),
            Error::InvalidCapacity => write!(f, "capacity must be at least 1"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::Allocation(e) => Some(e),
            Error::InvalidCapacity => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
