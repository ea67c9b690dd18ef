//! Narrow seams over the native entry points each listener needs.
//!
//! Listeners are generic over these traits so their state machines can be
//! driven by fakes in tests.

use std::io;
use std::time::Duration;

use crate::connection::NativeHandle;

#[cfg(unix)]
use crate::address::NativeAddressRecord;
#[cfg(unix)]
use std::os::unix::io::RawFd;

#[cfg(unix)]
mod libc_api;
#[cfg(windows)]
mod win32;

#[cfg(unix)]
pub use libc_api::LibcSocketApi;
#[cfg(windows)]
pub(crate) use win32::{read_pipe, write_pipe};
#[cfg(windows)]
pub use win32::{OverlappedOp, Win32PipeApi};

/// Unix domain stream socket entry points.
#[cfg(unix)]
pub trait SocketApi: Send + Sync + 'static {
    /// `socket(AF_UNIX, SOCK_STREAM, 0)`.
    fn socket(&self) -> io::Result<RawFd>;
    fn bind(&self, fd: RawFd, address: &NativeAddressRecord) -> io::Result<()>;
    fn listen(&self, fd: RawFd, backlog: i32) -> io::Result<()>;
    /// Blocks until a client connects; the peer address is written into `peer`.
    fn accept(&self, fd: RawFd, peer: &mut NativeAddressRecord) -> io::Result<RawFd>;
    /// `shutdown(fd, SHUT_RDWR)`; wakes a thread blocked in `accept` on Linux.
    fn shutdown(&self, fd: RawFd) -> io::Result<()>;
    fn close(&self, fd: RawFd) -> io::Result<()>;
}

/// Result of starting an overlapped `ConnectNamedPipe`.
#[derive(Debug)]
pub enum ConnectStatus<P> {
    /// The connect completed synchronously.
    Connected,
    /// `ERROR_PIPE_CONNECTED`: a client connected between create and connect.
    AlreadyConnected,
    /// `ERROR_NO_DATA`: a client connected and already went away.
    NoData,
    /// `ERROR_IO_PENDING`: completion must be awaited through the token.
    Pending(P),
    /// Any other error.
    Failed(io::Error),
}

/// Named pipe entry points.
pub trait PipeApi: Send + Sync + 'static {
    /// Keeps an overlapped connect alive until it completes.
    type Pending: Send;

    /// Create the single-instance pipe that reserves `path` for this process.
    fn create_lock_instance(&self, path: &str, buffer_size: u32) -> io::Result<NativeHandle>;
    /// Create a duplex, overlapped pipe instance.
    fn create_instance(
        &self,
        path: &str,
        max_instances: u32,
        buffer_size: u32,
    ) -> io::Result<NativeHandle>;
    /// Start an asynchronous connect on `handle`.
    fn connect(&self, handle: NativeHandle) -> ConnectStatus<Self::Pending>;
    /// Block until a pending connect completes.
    fn wait_connected(&self, handle: NativeHandle, pending: Self::Pending) -> io::Result<()>;
    /// Cancel all outstanding I/O issued on `handle`.
    fn cancel_io(&self, handle: NativeHandle) -> io::Result<()>;
    /// Wait up to `timeout` for in-flight I/O on `handle` to settle.
    fn wait_idle(&self, handle: NativeHandle, timeout: Duration);
    fn disconnect(&self, handle: NativeHandle) -> io::Result<()>;
    fn close(&self, handle: NativeHandle) -> io::Result<()>;
}

#[cfg(unix)]
impl<T: SocketApi> SocketApi for std::sync::Arc<T> {
    fn socket(&self) -> io::Result<RawFd> {
        (**self).socket()
    }

    fn bind(&self, fd: RawFd, address: &NativeAddressRecord) -> io::Result<()> {
        (**self).bind(fd, address)
    }

    fn listen(&self, fd: RawFd, backlog: i32) -> io::Result<()> {
        (**self).listen(fd, backlog)
    }

    fn accept(&self, fd: RawFd, peer: &mut NativeAddressRecord) -> io::Result<RawFd> {
        (**self).accept(fd, peer)
    }

    fn shutdown(&self, fd: RawFd) -> io::Result<()> {
        (**self).shutdown(fd)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        (**self).close(fd)
    }
}

impl<T: PipeApi> PipeApi for std::sync::Arc<T> {
    type Pending = T::Pending;

    fn create_lock_instance(&self, path: &str, buffer_size: u32) -> io::Result<NativeHandle> {
        (**self).create_lock_instance(path, buffer_size)
    }

    fn create_instance(
        &self,
        path: &str,
        max_instances: u32,
        buffer_size: u32,
    ) -> io::Result<NativeHandle> {
        (**self).create_instance(path, max_instances, buffer_size)
    }

    fn connect(&self, handle: NativeHandle) -> ConnectStatus<Self::Pending> {
        (**self).connect(handle)
    }

    fn wait_connected(&self, handle: NativeHandle, pending: Self::Pending) -> io::Result<()> {
        (**self).wait_connected(handle, pending)
    }

    fn cancel_io(&self, handle: NativeHandle) -> io::Result<()> {
        (**self).cancel_io(handle)
    }

    fn wait_idle(&self, handle: NativeHandle, timeout: Duration) {
        (**self).wait_idle(handle, timeout)
    }

    fn disconnect(&self, handle: NativeHandle) -> io::Result<()> {
        (**self).disconnect(handle)
    }

    fn close(&self, handle: NativeHandle) -> io::Result<()> {
        (**self).close(handle)
    }
}
