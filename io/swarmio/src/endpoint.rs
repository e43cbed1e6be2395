//! Non-blocking TCP endpoint primitives.
//!
//! Thin `io::Result` wrappers over the socket syscalls the engine needs.
//! Fds are plain [`RawFd`]s and ownership stays with the caller; "would
//! block" surfaces as [`io::ErrorKind::WouldBlock`].

use std::io;
use std::os::fd::RawFd;

/// Create a bound, listening TCP socket on `port`, all interfaces.
pub fn tcp_server(port: u16, backlog: i32) -> io::Result<RawFd> {
    // Safety: plain syscalls on an fd we own; error paths close it.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let optval: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr.s_addr = libc::INADDR_ANY;

    let ret = unsafe {
        libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    if unsafe { libc::listen(fd, backlog) } < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    Ok(fd)
}

/// Put `fd` into non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Accept one pending connection on a non-blocking listener.
pub fn accept(fd: RawFd) -> io::Result<RawFd> {
    let ret = unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret)
}

/// Read into `buf`. `Ok(0)` means the peer closed the stream.
pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Best-effort write; returns the number of bytes the kernel took.
pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Read the one pending out-of-band byte.
pub fn read_oob(fd: RawFd) -> io::Result<u8> {
    let mut byte = 0u8;
    let n = unsafe {
        libc::recv(
            fd,
            &mut byte as *mut u8 as *mut libc::c_void,
            1,
            libc::MSG_OOB,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(byte)
}

// Not exposed by the `libc` crate for this target; value matches the Linux
// kernel's <asm-generic/sockios.h> definition.
#[cfg(target_os = "linux")]
const SIOCATMARK: libc::c_ulong = 0x8905;

/// Whether the stream's read pointer sits at the urgent mark.
pub fn at_mark(fd: RawFd) -> io::Result<bool> {
    let mut mark: libc::c_int = 0;
    if unsafe { libc::ioctl(fd, SIOCATMARK, &mut mark) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(mark != 0)
}

/// Release `fd`.
pub fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}
