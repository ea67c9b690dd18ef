use std::io;
use std::os::unix::io::RawFd;

use crate::address::NativeAddressRecord;
use crate::sys::SocketApi;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SOCKET_TYPE: libc::c_int = libc::SOCK_STREAM | libc::SOCK_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SOCKET_TYPE: libc::c_int = libc::SOCK_STREAM;

/// [`SocketApi`] backed by the C library.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibcSocketApi;

fn check(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

impl SocketApi for LibcSocketApi {
    fn socket(&self) -> io::Result<RawFd> {
        // SAFETY: plain syscall with constant arguments.
        check(unsafe { libc::socket(libc::AF_UNIX, SOCKET_TYPE, 0) })
    }

    fn bind(&self, fd: RawFd, address: &NativeAddressRecord) -> io::Result<()> {
        // SAFETY: `address` points to a live sockaddr_un and `socklen` never exceeds its size.
        check(unsafe { libc::bind(fd, address.as_sockaddr(), address.socklen()) }).map(drop)
    }

    fn listen(&self, fd: RawFd, backlog: i32) -> io::Result<()> {
        // SAFETY: plain syscall on an fd owned by the caller.
        check(unsafe { libc::listen(fd, backlog) }).map(drop)
    }

    fn accept(&self, fd: RawFd, peer: &mut NativeAddressRecord) -> io::Result<RawFd> {
        let (addr, len) = peer.raw_parts_mut();
        // SAFETY: `addr` and `len` come from one exclusive borrow of `peer` and describe a
        // writable sockaddr_un of the size stored in `len`.
        check(unsafe { libc::accept(fd, addr, len) })
    }

    fn shutdown(&self, fd: RawFd) -> io::Result<()> {
        // SAFETY: plain syscall on an fd owned by the caller.
        check(unsafe { libc::shutdown(fd, libc::SHUT_RDWR) }).map(drop)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        // SAFETY: the caller gives up ownership of `fd`.
        check(unsafe { libc::close(fd) }).map(drop)
    }
}
