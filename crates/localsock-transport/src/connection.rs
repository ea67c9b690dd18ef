use std::io::{self, Read, Write};

use tracing::{debug, warn};

use crate::error::{NativeOp, Result, TransportError};

/// An OS-level handle: a file descriptor on Unix, a `HANDLE` on Windows.
///
/// Compared by value, which is what the pipe registry keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(isize);

impl NativeHandle {
    pub const fn from_raw(raw: isize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> isize {
        self.0
    }

    #[cfg(unix)]
    pub fn from_fd(fd: std::os::unix::io::RawFd) -> Self {
        Self(fd as isize)
    }

    #[cfg(unix)]
    pub fn as_fd(self) -> std::os::unix::io::RawFd {
        self.0 as std::os::unix::io::RawFd
    }
}

/// Releases a connection's handle. Runs exactly once per [`Connection`].
pub type CloseCallback = Box<dyn FnOnce(NativeHandle) -> io::Result<()> + Send>;

/// What kind of native object a [`Connection`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// A connected Unix domain stream socket.
    Socket,
    /// A named pipe instance.
    Pipe,
}

/// One accepted (or connected) client, wrapping exactly one native handle.
///
/// Dropping the connection runs the close callback if [`Connection::close`]
/// was not called first.
pub struct Connection {
    handle: NativeHandle,
    kind: HandleKind,
    strict_length: bool,
    on_close: Option<CloseCallback>,
}

impl Connection {
    pub(crate) fn new(handle: NativeHandle, kind: HandleKind, on_close: CloseCallback) -> Self {
        Self {
            handle,
            kind,
            strict_length: false,
            on_close: Some(on_close),
        }
    }

    pub(crate) fn with_strict_length(mut self, strict: bool) -> Self {
        self.strict_length = strict;
        self
    }

    /// The wrapped native handle.
    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Whether short reads are reported as errors.
    pub fn strict_length(&self) -> bool {
        self.strict_length
    }

    /// Release the connection, running its close callback.
    pub fn close(mut self) -> Result<()> {
        self.release()
            .map_err(|e| TransportError::native(NativeOp::Close, e))
    }

    fn release(&mut self) -> io::Result<()> {
        match self.on_close.take() {
            Some(callback) => {
                debug!(handle = self.handle.as_raw(), "closing connection");
                callback(self.handle)
            }
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.on_close.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }
        Ok(())
    }

    #[cfg(unix)]
    fn read_native(&self, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::unix::io::FromRawFd;
        use std::os::unix::net::UnixStream;

        match self.kind {
            HandleKind::Socket => {
                // SAFETY: the fd is owned by this connection and stays open until the
                // close callback runs; ManuallyDrop keeps the borrowed stream from closing it.
                let stream =
                    std::mem::ManuallyDrop::new(unsafe { UnixStream::from_raw_fd(self.handle.as_fd()) });
                let mut reader: &UnixStream = &stream;
                reader.read(buf)
            }
            HandleKind::Pipe => Err(unsupported_kind()),
        }
    }

    #[cfg(unix)]
    fn write_native(&self, buf: &[u8]) -> io::Result<usize> {
        use std::os::unix::io::FromRawFd;
        use std::os::unix::net::UnixStream;

        match self.kind {
            HandleKind::Socket => {
                // SAFETY: see `read_native`.
                let stream =
                    std::mem::ManuallyDrop::new(unsafe { UnixStream::from_raw_fd(self.handle.as_fd()) });
                let mut writer: &UnixStream = &stream;
                writer.write(buf)
            }
            HandleKind::Pipe => Err(unsupported_kind()),
        }
    }

    #[cfg(windows)]
    fn read_native(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.kind {
            HandleKind::Pipe => crate::sys::read_pipe(self.handle, buf),
            HandleKind::Socket => Err(unsupported_kind()),
        }
    }

    #[cfg(windows)]
    fn write_native(&self, buf: &[u8]) -> io::Result<usize> {
        match self.kind {
            HandleKind::Pipe => crate::sys::write_pipe(self.handle, buf),
            HandleKind::Socket => Err(unsupported_kind()),
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn read_native(&self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported_kind())
    }

    #[cfg(not(any(unix, windows)))]
    fn write_native(&self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported_kind())
    }
}

fn unsupported_kind() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "handle kind has no stream adapter on this platform",
    )
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let read = self.read_native(buf)?;
        if self.strict_length && read != 0 && read != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("read {read} bytes, expected {}", buf.len()),
            ));
        }
        Ok(read)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.write_native(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(handle = self.handle.as_raw(), error = %err, "failed to release connection");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle.as_raw())
            .field("kind", &self.kind)
            .field("open", &self.on_close.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_callback(count: &Arc<AtomicUsize>) -> CloseCallback {
        let count = Arc::clone(count);
        Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn close_runs_callback_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let conn = Connection::new(
            NativeHandle::from_raw(7),
            HandleKind::Pipe,
            counting_callback(&count),
        );
        conn.close().expect("close should succeed");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_runs_callback_once() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _conn = Connection::new(
                NativeHandle::from_raw(7),
                HandleKind::Pipe,
                counting_callback(&count),
            );
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_error_is_reported() {
        let conn = Connection::new(
            NativeHandle::from_raw(3),
            HandleKind::Pipe,
            Box::new(|_| Err(io::Error::from_raw_os_error(9))),
        );
        let err = conn.close().expect_err("callback failure should surface");
        assert_eq!(err.native_code(), Some(9));
    }

    #[cfg(unix)]
    #[test]
    fn socket_connection_reads_and_writes() {
        use std::os::unix::io::IntoRawFd;
        use std::os::unix::net::UnixStream;

        let (left, mut right) = UnixStream::pair().expect("socketpair should succeed");
        let fd = left.into_raw_fd();
        let mut conn = Connection::new(
            NativeHandle::from_fd(fd),
            HandleKind::Socket,
            Box::new(|handle| {
                // SAFETY: test owns the fd.
                drop(unsafe {
                    <UnixStream as std::os::unix::io::FromRawFd>::from_raw_fd(handle.as_fd())
                });
                Ok(())
            }),
        );

        right.write_all(b"ping").expect("write should succeed");
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).expect("read should succeed");
        assert_eq!(&buf, b"ping");

        conn.write_all(b"pong").expect("write should succeed");
        right.read_exact(&mut buf).expect("read should succeed");
        assert_eq!(&buf, b"pong");
    }

    #[cfg(unix)]
    #[test]
    fn strict_length_rejects_short_read() {
        use std::os::unix::io::IntoRawFd;
        use std::os::unix::net::UnixStream;

        let (left, mut right) = UnixStream::pair().expect("socketpair should succeed");
        let mut conn = Connection::new(
            NativeHandle::from_fd(left.into_raw_fd()),
            HandleKind::Socket,
            Box::new(|handle| {
                // SAFETY: test owns the fd.
                drop(unsafe {
                    <UnixStream as std::os::unix::io::FromRawFd>::from_raw_fd(handle.as_fd())
                });
                Ok(())
            }),
        )
        .with_strict_length(true);

        right.write_all(b"ab").expect("write should succeed");
        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).expect_err("short read should fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
