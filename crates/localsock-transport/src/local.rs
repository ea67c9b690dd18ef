//! Host-platform entry points: a Unix domain socket on Unix, a named pipe on Windows.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::Result;
use crate::traits::ServerSocket;

/// Create a listener for `path` on the host transport.
#[cfg(unix)]
pub fn bind(path: impl AsRef<Path>) -> Result<Box<dyn ServerSocket>> {
    Ok(Box::new(crate::uds::UnixServerSocket::bind_path(path)?))
}

/// Create a listener for `path` on the host transport.
#[cfg(windows)]
pub fn bind(path: impl AsRef<Path>) -> Result<Box<dyn ServerSocket>> {
    let name = path.as_ref().to_string_lossy();
    Ok(Box::new(crate::pipe::PipeServerSocket::new(&name)?))
}

/// Connect to a listener at `path`.
#[cfg(unix)]
pub fn connect(path: impl AsRef<Path>) -> Result<Connection> {
    use std::os::unix::io::{FromRawFd, IntoRawFd};
    use std::os::unix::net::UnixStream;

    use crate::connection::{HandleKind, NativeHandle};

    let fd = UnixStream::connect(path.as_ref())?.into_raw_fd();
    Ok(Connection::new(
        NativeHandle::from_fd(fd),
        HandleKind::Socket,
        Box::new(|handle| {
            // SAFETY: the fd came from `into_raw_fd` above and is released only here.
            drop(unsafe { UnixStream::from_raw_fd(handle.as_fd()) });
            Ok(())
        }),
    ))
}

/// Connect to a listener at `path`. Bare names get the pipe namespace prefix.
#[cfg(windows)]
pub fn connect(path: impl AsRef<Path>) -> Result<Connection> {
    use std::fs::{File, OpenOptions};
    use std::os::windows::io::{FromRawHandle, IntoRawHandle, RawHandle};

    use crate::connection::{HandleKind, NativeHandle};
    use crate::traits::normalize_pipe_name;

    let name = normalize_pipe_name(&path.as_ref().to_string_lossy());
    let handle = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&name)?
        .into_raw_handle();
    Ok(Connection::new(
        NativeHandle::from_raw(handle as isize),
        HandleKind::Pipe,
        Box::new(|handle| {
            // SAFETY: the handle came from `into_raw_handle` above and is released only here.
            drop(unsafe { File::from_raw_handle(handle.as_raw() as RawHandle) });
            Ok(())
        }),
    ))
}

/// Accept connections until `keep_running` is cleared, handing each to `on_accept`.
///
/// Clear the flag and close the listener from another thread to stop: the
/// failing `accept` that follows ends the loop. Returns the number of
/// connections accepted.
pub fn serve<F>(
    listener: &dyn ServerSocket,
    keep_running: &AtomicBool,
    mut on_accept: F,
) -> Result<u64>
where
    F: FnMut(Connection),
{
    let mut accepted = 0u64;
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok(conn) => {
                accepted += 1;
                debug!(transport = listener.transport_name(), accepted, "connection accepted");
                on_accept(conn);
            }
            Err(err) if !keep_running.load(Ordering::SeqCst) || err.is_state_error() => {
                debug!(error = %err, "accept loop stopping");
                break;
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                return Err(err);
            }
        }
    }
    Ok(accepted)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/lsock-local-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("s.sock")
    }

    #[test]
    fn bind_and_connect_round_trip() {
        let path = make_sock_path("rt");
        let listener = bind(&path).expect("bind should succeed");
        assert_eq!(listener.transport_name(), "unix-domain-socket");

        let mut client = connect(&path).expect("connect should succeed");
        let mut server = listener.accept().expect("accept should succeed");

        client.write_all(b"hello").expect("client write");
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).expect("server read");
        assert_eq!(&buf, b"hello");

        client.close().expect("client close");
        server.close().expect("server close");
        listener.close().expect("listener close");
        assert!(!path.exists(), "socket file should be removed on close");
        let _ = std::fs::remove_dir(path.parent().expect("parent"));
    }

    #[test]
    fn connect_without_listener_fails() {
        let path = make_sock_path("none");
        assert!(connect(&path).is_err());
        let _ = std::fs::remove_dir(path.parent().expect("parent"));
    }

    #[test]
    fn serve_stops_after_flag_cleared() {
        let path = make_sock_path("serve");
        let listener: Arc<dyn ServerSocket> = Arc::from(bind(&path).expect("bind should succeed"));
        let keep_running = Arc::new(AtomicBool::new(true));

        let server = {
            let listener = Arc::clone(&listener);
            let keep_running = Arc::clone(&keep_running);
            thread::spawn(move || {
                serve(listener.as_ref(), &keep_running, |mut conn| {
                    let mut buf = [0u8; 4];
                    if conn.read_exact(&mut buf).is_ok() {
                        let _ = conn.write_all(&buf);
                    }
                })
            })
        };

        for _ in 0..3 {
            let mut client = connect(&path).expect("connect should succeed");
            client.write_all(b"echo").expect("client write");
            let mut reply = [0u8; 4];
            client.read_exact(&mut reply).expect("client read");
            assert_eq!(&reply, b"echo");
        }

        keep_running.store(false, Ordering::SeqCst);
        listener.close().expect("close should succeed");
        // Only Linux wakes a blocked accept on shutdown.
        if cfg!(target_os = "linux") {
            let accepted = server
                .join()
                .expect("server thread")
                .expect("serve should end cleanly");
            assert_eq!(accepted, 3);
        }
        let _ = std::fs::remove_dir(path.parent().expect("parent"));
    }
}
