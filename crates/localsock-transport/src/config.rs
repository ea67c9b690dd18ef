use std::time::Duration;

/// Default listen backlog for Unix domain listeners.
pub const DEFAULT_BACKLOG: i32 = 50;
/// Default permission mode for created socket paths.
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
/// `PIPE_UNLIMITED_INSTANCES`.
pub const UNLIMITED_INSTANCES: u32 = 255;
/// In/out buffer size for each pipe instance.
pub const DEFAULT_PIPE_BUFFER_SIZE: u32 = 65535;
/// How long a graceful pipe disconnect waits for in-flight I/O.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Controls Unix domain listener behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixListenerConfig {
    /// Maximum number of queued, not yet accepted connections.
    pub backlog: i32,
    /// Permission mode applied to the socket file after bind. `None` leaves the umask default.
    pub mode: Option<u32>,
    /// Remove the socket file this listener created when it is closed.
    pub cleanup_on_close: bool,
}

impl Default for UnixListenerConfig {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            mode: Some(DEFAULT_SOCKET_MODE),
            cleanup_on_close: true,
        }
    }
}

impl UnixListenerConfig {
    /// Config with an explicit backlog and the remaining defaults.
    pub fn with_backlog(backlog: i32) -> Self {
        Self {
            backlog,
            ..Self::default()
        }
    }
}

/// Controls named pipe listener behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeListenerConfig {
    /// Maximum number of simultaneous pipe instances for the path.
    pub max_instances: u32,
    /// In/out buffer size requested for each instance.
    pub buffer_size: u32,
    /// When true, a read that returns fewer bytes than requested is an error.
    pub strict_length: bool,
    /// Upper bound on the in-flight I/O wait before a graceful disconnect.
    pub disconnect_timeout: Duration,
}

impl Default for PipeListenerConfig {
    fn default() -> Self {
        Self {
            max_instances: UNLIMITED_INSTANCES,
            buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
            strict_length: false,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
        }
    }
}
