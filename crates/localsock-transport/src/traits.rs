use std::fmt;
use std::path::{Path, PathBuf};

use crate::connection::Connection;
use crate::error::Result;

/// Namespace every Windows named pipe lives under.
pub const PIPE_PREFIX: &str = r"\\.\pipe\";

/// A local endpoint, keyed by path on both transports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerAddress {
    path: PathBuf,
}

impl ListenerAddress {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// The pipe name for this address, carrying [`PIPE_PREFIX`].
    pub fn pipe_name(&self) -> String {
        normalize_pipe_name(&self.path.to_string_lossy())
    }
}

impl From<&str> for ListenerAddress {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for ListenerAddress {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for ListenerAddress {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl fmt::Display for ListenerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Prefix `name` with the pipe namespace unless it already has it.
pub fn normalize_pipe_name(name: &str) -> String {
    if name.starts_with(PIPE_PREFIX) {
        name.to_string()
    } else {
        format!("{PIPE_PREFIX}{name}")
    }
}

/// The listener contract shared by the Unix socket and named pipe transports.
///
/// All methods take `&self` so one thread can block in [`accept`](Self::accept)
/// while another calls [`close`](Self::close).
pub trait ServerSocket: Send + Sync {
    /// Bind to `address`. Named pipe listeners are bound at construction and always fail.
    fn bind(&self, address: &ListenerAddress) -> Result<()>;

    /// Block until a client connects.
    fn accept(&self) -> Result<Connection>;

    /// Tear the listener down. A second call fails with `AlreadyClosed`.
    fn close(&self) -> Result<()>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}
