use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::address::NativeAddressRecord;
use crate::config::UnixListenerConfig;
use crate::connection::{Connection, HandleKind, NativeHandle};
use crate::error::{NativeOp, Result, TransportError};
use crate::sys::{LibcSocketApi, SocketApi};
use crate::traits::{ListenerAddress, ServerSocket};

/// Slot value meaning "closed, no longer a valid fd".
pub const INVALID_FD: RawFd = -1;

/// An fd cell that `close` invalidates while `accept` may still be reading it.
///
/// The value is only ever replaced, never reused: `accept` sees either the
/// original fd or [`INVALID_FD`].
#[derive(Debug)]
pub struct FdSlot(AtomicI32);

impl FdSlot {
    pub fn new(fd: RawFd) -> Self {
        Self(AtomicI32::new(fd))
    }

    /// The current fd, or `None` once invalidated.
    pub fn get(&self) -> Option<RawFd> {
        match self.0.load(Ordering::SeqCst) {
            INVALID_FD => None,
            fd => Some(fd),
        }
    }

    /// Swap in [`INVALID_FD`] and return the previous fd, if it was still valid.
    pub fn invalidate(&self) -> Option<RawFd> {
        match self.0.swap(INVALID_FD, Ordering::SeqCst) {
            INVALID_FD => None,
            fd => Some(fd),
        }
    }
}

/// Lifecycle of a listener: `Unbound -> Bound -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Bound,
    Closed,
}

#[derive(Debug)]
struct Lifecycle {
    state: ListenerState,
    path: Option<PathBuf>,
    created_inode: Option<(u64, u64)>,
}

/// Unix domain socket server.
///
/// `bind` and `close` are serialized by a short lock. `accept` only checks
/// state under that lock and then blocks in the native call without it, so
/// a concurrent `close` can always proceed.
pub struct UnixServerSocket<A: SocketApi = LibcSocketApi> {
    api: Arc<A>,
    fd: FdSlot,
    lifecycle: Mutex<Lifecycle>,
    config: UnixListenerConfig,
}

impl UnixServerSocket<LibcSocketApi> {
    /// Create an unbound socket with the default config.
    pub fn new() -> Result<Self> {
        Self::with_config(UnixListenerConfig::default())
    }

    pub fn with_config(config: UnixListenerConfig) -> Result<Self> {
        Self::with_api(LibcSocketApi, config)
    }

    /// Create a socket and bind it to `path` with the default config.
    pub fn bind_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_path_with_config(path, UnixListenerConfig::default())
    }

    pub fn bind_path_with_config(
        path: impl AsRef<Path>,
        config: UnixListenerConfig,
    ) -> Result<Self> {
        let socket = Self::with_config(config)?;
        socket.bind(&ListenerAddress::new(path.as_ref()))?;
        Ok(socket)
    }
}

impl<A: SocketApi> UnixServerSocket<A> {
    /// Create an unbound socket on top of `api`.
    pub fn with_api(api: A, config: UnixListenerConfig) -> Result<Self> {
        let fd = api
            .socket()
            .map_err(|e| TransportError::native(NativeOp::Socket, e))?;
        debug!(fd, "created unix stream socket");
        Ok(Self {
            api: Arc::new(api),
            fd: FdSlot::new(fd),
            lifecycle: Mutex::new(Lifecycle {
                state: ListenerState::Unbound,
                path: None,
                created_inode: None,
            }),
            config,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ListenerState {
        self.lock().state
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    pub fn config(&self) -> &UnixListenerConfig {
        &self.config
    }

    /// Bind to `address` and start listening with the configured backlog.
    ///
    /// A socket file left behind by a dead listener is removed first. A path
    /// with a live listener, or any other kind of file, makes the bind fail.
    /// If listen or chmod fails after the native bind, the native socket is
    /// released, the created file is removed and the listener ends up closed.
    pub fn bind(&self, address: &ListenerAddress) -> Result<()> {
        let mut lifecycle = self.lock();
        match lifecycle.state {
            ListenerState::Bound => return Err(TransportError::AlreadyBound),
            ListenerState::Closed => return Err(TransportError::AlreadyClosed),
            ListenerState::Unbound => {}
        }

        let path = address.as_path();
        if path.as_os_str().is_empty() {
            return Err(TransportError::InvalidPath {
                path: path.to_path_buf(),
                reason: "path is empty",
            });
        }
        let record = NativeAddressRecord::encode(path)?;
        let fd = self.fd.get().ok_or(TransportError::AlreadyClosed)?;

        remove_stale_socket(path)?;

        self.api
            .bind(fd, &record)
            .map_err(|e| TransportError::native(NativeOp::Bind, e))?;
        let created_inode = std::fs::symlink_metadata(path)
            .ok()
            .map(|metadata| (metadata.dev(), metadata.ino()));

        let configured = self
            .api
            .listen(fd, self.config.backlog)
            .map_err(|e| TransportError::native(NativeOp::Listen, e))
            .and_then(|()| match self.config.mode {
                Some(mode) => std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                    .map_err(|e| TransportError::native(NativeOp::Bind, e)),
                None => Ok(()),
            });
        if let Err(err) = configured {
            self.abandon(&mut lifecycle, path, created_inode);
            return Err(err);
        }

        lifecycle.created_inode = created_inode;
        lifecycle.path = Some(path.to_path_buf());
        lifecycle.state = ListenerState::Bound;

        info!(?path, backlog = self.config.backlog, "listening on unix domain socket");
        Ok(())
    }

    /// Tear down a half-bound socket: release the fd, drop the file it created
    /// and leave the listener closed.
    fn abandon(&self, lifecycle: &mut Lifecycle, path: &Path, created_inode: Option<(u64, u64)>) {
        lifecycle.state = ListenerState::Closed;
        if let Some(fd) = self.fd.invalidate() {
            if let Err(err) = self.api.close(fd) {
                warn!(fd, error = %err, "failed to close socket after bind failure");
            }
        }
        if let Some(inode) = created_inode {
            cleanup_socket_file(path, inode);
        }
        warn!(?path, "bind did not complete; listener closed");
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<Connection> {
        match self.state() {
            ListenerState::Unbound => return Err(TransportError::NotBound),
            ListenerState::Closed => return Err(TransportError::AlreadyClosed),
            ListenerState::Bound => {}
        }

        let fd = self.fd.get().ok_or(TransportError::AlreadyClosed)?;
        let mut peer = NativeAddressRecord::empty();
        let client = self.api.accept(fd, &mut peer).map_err(|e| {
            if self.fd.get().is_none() {
                debug!(error = %e, "accept interrupted by close");
            }
            TransportError::native(NativeOp::Accept, e)
        })?;

        // A close that started while we were blocked wins over the new client.
        if self.fd.get().is_none() {
            if let Err(err) = self.api.close(client) {
                warn!(fd = client, error = %err, "failed to release client accepted during close");
            }
            return Err(TransportError::AlreadyClosed);
        }

        debug!(fd = client, "accepted connection");
        let api = Arc::clone(&self.api);
        Ok(Connection::new(
            NativeHandle::from_fd(client),
            HandleKind::Socket,
            Box::new(move |handle| api.close(handle.as_fd())),
        ))
    }

    /// Close the listening socket. Not idempotent: a second call fails.
    pub fn close(&self) -> Result<()> {
        let mut lifecycle = self.lock();
        if lifecycle.state == ListenerState::Closed {
            return Err(TransportError::AlreadyClosed);
        }
        let was_bound = lifecycle.state == ListenerState::Bound;
        lifecycle.state = ListenerState::Closed;

        let result = match self.fd.invalidate() {
            Some(fd) => {
                if was_bound {
                    // Linux does not wake a blocked accept on close alone.
                    if let Err(err) = self.api.shutdown(fd) {
                        debug!(fd, error = %err, "shutdown before close failed");
                    }
                }
                self.api
                    .close(fd)
                    .map_err(|e| TransportError::native(NativeOp::Close, e))
            }
            None => Ok(()),
        };

        if self.config.cleanup_on_close {
            if let (Some(path), Some(inode)) = (&lifecycle.path, lifecycle.created_inode) {
                cleanup_socket_file(path, inode);
            }
        }

        debug!(path = ?lifecycle.path, "closed unix domain socket");
        result
    }
}

impl<A: SocketApi> ServerSocket for UnixServerSocket<A> {
    fn bind(&self, address: &ListenerAddress) -> Result<()> {
        UnixServerSocket::bind(self, address)
    }

    fn accept(&self) -> Result<Connection> {
        UnixServerSocket::accept(self)
    }

    fn close(&self) -> Result<()> {
        UnixServerSocket::close(self)
    }

    fn transport_name(&self) -> &'static str {
        "unix-domain-socket"
    }
}

impl<A: SocketApi> Drop for UnixServerSocket<A> {
    fn drop(&mut self) {
        if self.state() != ListenerState::Closed {
            if let Err(err) = self.close() {
                debug!(error = %err, "close on drop failed");
            }
        }
    }
}

/// Clear the way for a bind at `path`.
///
/// A socket file is removed only when nothing answers a connect on it.
fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return Ok(()),
    };
    if !metadata.file_type().is_socket() {
        return Err(TransportError::native(
            NativeOp::Bind,
            io::Error::new(io::ErrorKind::AlreadyExists, "existing path is not a unix socket"),
        ));
    }

    match UnixStream::connect(path) {
        Ok(_) => Err(TransportError::native(
            NativeOp::Bind,
            io::Error::new(io::ErrorKind::AddrInUse, "a listener is active on this path"),
        )),
        Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
            debug!(?path, "removing stale socket");
            std::fs::remove_file(path).map_err(|e| TransportError::native(NativeOp::Bind, e))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TransportError::native(NativeOp::Bind, err)),
    }
}

/// Remove `path` only if it is still the socket file this listener created.
fn cleanup_socket_file(path: &Path, (expected_dev, expected_ino): (u64, u64)) {
    if let Ok(metadata) = std::fs::symlink_metadata(path) {
        if metadata.file_type().is_socket()
            && metadata.dev() == expected_dev
            && metadata.ino() == expected_ino
        {
            debug!(?path, "cleaning up socket file");
            let _ = std::fs::remove_file(path);
        } else {
            debug!(?path, "socket path identity changed; skipping cleanup");
        }
    }
}
