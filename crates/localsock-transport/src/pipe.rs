use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::PipeListenerConfig;
use crate::connection::{Connection, HandleKind, NativeHandle};
use crate::error::{NativeOp, Result, TransportError};
use crate::registry::HandleRegistry;
use crate::sys::{ConnectStatus, PipeApi};
use crate::traits::{normalize_pipe_name, ListenerAddress, ServerSocket};

/// State shared between a listener and the connections it hands out.
struct Shared<A: PipeApi> {
    api: A,
    registry: HandleRegistry,
    disconnect_timeout: Duration,
}

impl<A: PipeApi> Shared<A> {
    /// Cancel outstanding I/O on a never-connected instance and release it.
    fn release_pending(&self, handle: NativeHandle) -> io::Result<()> {
        if let Err(err) = self.api.cancel_io(handle) {
            // ERROR_NOT_FOUND when nothing was in flight.
            debug!(handle = handle.as_raw(), error = %err, "cancel before close failed");
        }
        self.api.close(handle)
    }

    /// Disconnect a connected instance and release it.
    ///
    /// `graceful` waits for in-flight I/O first; listener shutdown skips the wait.
    fn release_connected(&self, handle: NativeHandle, graceful: bool) -> io::Result<()> {
        if graceful {
            self.api.wait_idle(handle, self.disconnect_timeout);
        }
        if let Err(err) = self.api.disconnect(handle) {
            debug!(handle = handle.as_raw(), error = %err, "disconnect before close failed");
        }
        self.api.close(handle)
    }

    /// Close callback for connections handed out by `accept`.
    fn on_connection_closed(&self, handle: NativeHandle) -> io::Result<()> {
        if self.registry.remove_connected(handle) {
            self.release_connected(handle, true)
        } else if self.registry.remove_pending(handle) {
            self.release_pending(handle)
        } else {
            // The listener was closed and already released this instance.
            Ok(())
        }
    }
}

/// Named pipe server.
///
/// Every `accept` creates a new pipe instance, so the listener owns a set of
/// handles instead of one socket. A separate `<path>_lock` instance reserves
/// the name for the lifetime of the listener.
pub struct PipeServerSocket<A: PipeApi> {
    shared: Arc<Shared<A>>,
    path: String,
    lock_handle: NativeHandle,
    config: PipeListenerConfig,
    closed: AtomicBool,
}

#[cfg(windows)]
impl PipeServerSocket<crate::sys::Win32PipeApi> {
    /// Reserve `path` with the default config.
    pub fn new(path: &str) -> Result<Self> {
        Self::with_config(path, PipeListenerConfig::default())
    }

    pub fn with_config(path: &str, config: PipeListenerConfig) -> Result<Self> {
        Self::with_api(crate::sys::Win32PipeApi, path, config)
    }
}

impl<A: PipeApi> PipeServerSocket<A> {
    /// Reserve `path` (prefixed with the pipe namespace if needed) on top of `api`.
    pub fn with_api(api: A, path: &str, config: PipeListenerConfig) -> Result<Self> {
        let path = normalize_pipe_name(path);
        let lock_path = format!("{path}_lock");

        let lock_handle = api
            .create_lock_instance(&lock_path, config.buffer_size)
            .map_err(|e| TransportError::native(NativeOp::CreatePipe, e))?;
        if let Err(err) = api.disconnect(lock_handle) {
            if let Err(close_err) = api.close(lock_handle) {
                warn!(error = %close_err, "failed to release pipe lock");
            }
            return Err(TransportError::native(NativeOp::DisconnectPipe, err));
        }

        info!(path = %path, max_instances = config.max_instances, "reserved named pipe");
        Ok(Self {
            shared: Arc::new(Shared {
                api,
                registry: HandleRegistry::new(),
                disconnect_timeout: config.disconnect_timeout,
            }),
            path,
            lock_handle,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// The normalized pipe path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &PipeListenerConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// `(pending, connected)` instance counts.
    pub fn handle_counts(&self) -> (usize, usize) {
        self.shared.registry.counts()
    }

    /// Always fails: the path is given at construction.
    pub fn bind(&self, _address: &ListenerAddress) -> Result<()> {
        Err(TransportError::Unsupported(
            "named pipes are bound at construction; pass the path to the constructor",
        ))
    }

    /// Create a new pipe instance and block until a client connects to it.
    pub fn accept(&self) -> Result<Connection> {
        if self.is_closed() {
            return Err(TransportError::AlreadyClosed);
        }

        let api = &self.shared.api;
        let registry = &self.shared.registry;

        let handle = api
            .create_instance(&self.path, self.config.max_instances, self.config.buffer_size)
            .map_err(|e| TransportError::native(NativeOp::CreatePipe, e))?;
        if !registry.add_pending(handle) {
            warn!(handle = handle.as_raw(), "new pipe instance was already tracked as pending");
        }

        // A close that drained the registry before we registered would miss this handle.
        if self.is_closed() {
            if registry.remove_pending(handle) {
                if let Err(err) = self.shared.release_pending(handle) {
                    warn!(handle = handle.as_raw(), error = %err, "failed to release pipe instance");
                }
            }
            return Err(TransportError::AlreadyClosed);
        }

        match api.connect(handle) {
            ConnectStatus::Connected | ConnectStatus::AlreadyConnected => self.hand_off(handle),
            ConnectStatus::NoData => {
                // The client connected and left before we saw it. Hand the
                // broken instance out anyway instead of looping here: the
                // first read or write on it reports the failure. It stays in
                // `pending` so its close callback cancels and releases it.
                debug!(handle = handle.as_raw(), "client already disconnected; deferring failure");
                Ok(self.connection(handle))
            }
            ConnectStatus::Pending(pending) => match api.wait_connected(handle, pending) {
                Ok(()) => self.hand_off(handle),
                Err(err) => {
                    if registry.remove_pending(handle) {
                        if let Err(close_err) = self.shared.release_pending(handle) {
                            warn!(handle = handle.as_raw(), error = %close_err, "failed to release pipe instance");
                        }
                    }
                    Err(TransportError::native(NativeOp::WaitConnect, err))
                }
            },
            // Left in `pending`; `close` releases it.
            ConnectStatus::Failed(err) => Err(TransportError::native(NativeOp::ConnectPipe, err)),
        }
    }

    fn hand_off(&self, handle: NativeHandle) -> Result<Connection> {
        if !self.shared.registry.promote(handle) {
            // `close` drained and released the instance while we were connecting.
            return Err(TransportError::AlreadyClosed);
        }
        debug!(handle = handle.as_raw(), "accepted pipe connection");
        Ok(self.connection(handle))
    }

    fn connection(&self, handle: NativeHandle) -> Connection {
        let shared = Arc::clone(&self.shared);
        Connection::new(
            handle,
            HandleKind::Pipe,
            Box::new(move |handle| shared.on_connection_closed(handle)),
        )
        .with_strict_length(self.config.strict_length)
    }

    /// Release every instance and the lock. Not idempotent: a second call fails.
    ///
    /// Cleanup is best-effort; the lock is released even if an instance fails
    /// to close, and the first failure is reported afterwards.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyClosed);
        }

        let mut first_error: Option<io::Error> = None;

        for handle in self.shared.registry.drain_pending() {
            if let Err(err) = self.shared.release_pending(handle) {
                warn!(handle = handle.as_raw(), error = %err, "failed to release pending pipe instance");
                first_error.get_or_insert(err);
            }
        }
        for handle in self.shared.registry.drain_connected() {
            if let Err(err) = self.shared.release_connected(handle, false) {
                warn!(handle = handle.as_raw(), error = %err, "failed to release connected pipe instance");
                first_error.get_or_insert(err);
            }
        }

        if let Err(err) = self.shared.api.close(self.lock_handle) {
            warn!(error = %err, "failed to release pipe lock");
            first_error.get_or_insert(err);
        }

        debug!(path = %self.path, "closed named pipe listener");
        match first_error {
            Some(err) => Err(TransportError::native(NativeOp::Close, err)),
            None => Ok(()),
        }
    }
}

impl<A: PipeApi> ServerSocket for PipeServerSocket<A> {
    fn bind(&self, address: &ListenerAddress) -> Result<()> {
        PipeServerSocket::bind(self, address)
    }

    fn accept(&self) -> Result<Connection> {
        PipeServerSocket::accept(self)
    }

    fn close(&self) -> Result<()> {
        PipeServerSocket::close(self)
    }

    fn transport_name(&self) -> &'static str {
        "named-pipe"
    }
}

impl<A: PipeApi> Drop for PipeServerSocket<A> {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(err) = self.close() {
                debug!(error = %err, "close on drop failed");
            }
        }
    }
}
