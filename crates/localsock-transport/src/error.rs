use std::fmt;
use std::path::PathBuf;

/// Native entry points whose failures are surfaced as [`TransportError::NativeCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOp {
    Socket,
    Bind,
    Listen,
    Accept,
    Shutdown,
    Close,
    CreatePipe,
    ConnectPipe,
    WaitConnect,
    CancelIo,
    DisconnectPipe,
}

impl NativeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            NativeOp::Socket => "socket",
            NativeOp::Bind => "bind",
            NativeOp::Listen => "listen",
            NativeOp::Accept => "accept",
            NativeOp::Shutdown => "shutdown",
            NativeOp::Close => "close",
            NativeOp::CreatePipe => "CreateNamedPipe",
            NativeOp::ConnectPipe => "ConnectNamedPipe",
            NativeOp::WaitConnect => "GetOverlappedResult",
            NativeOp::CancelIo => "CancelIoEx",
            NativeOp::DisconnectPipe => "DisconnectNamedPipe",
        }
    }
}

impl fmt::Display for NativeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in server socket operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket path does not fit the native address record.
    #[error("socket path too long ({len} bytes, max {max}): {}", path.display())]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The socket path cannot name a filesystem socket.
    #[error("invalid socket path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: &'static str },

    /// `bind` was called on a listener that is already bound.
    #[error("socket is already bound")]
    AlreadyBound,

    /// `accept` was called before `bind`.
    #[error("socket is not bound")]
    NotBound,

    /// The listener has been closed.
    #[error("socket is already closed")]
    AlreadyClosed,

    /// The operation is not available on this transport.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A native entry point failed.
    #[error("{operation} failed: {source}")]
    NativeCall {
        operation: NativeOp,
        source: std::io::Error,
    },

    /// An I/O error occurred on a connection stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub(crate) fn native(operation: NativeOp, source: std::io::Error) -> Self {
        TransportError::NativeCall { operation, source }
    }

    /// The OS error code carried by a native or I/O failure, if any.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            TransportError::NativeCall { source, .. } | TransportError::Io(source) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }

    /// Whether this error reports misuse of the listener state machine.
    ///
    /// These are never transient and must not be retried.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            TransportError::AlreadyBound
                | TransportError::NotBound
                | TransportError::AlreadyClosed
                | TransportError::Unsupported(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_call_carries_os_code() {
        let err = TransportError::native(NativeOp::Bind, std::io::Error::from_raw_os_error(98));
        assert_eq!(err.native_code(), Some(98));
        assert!(err.to_string().starts_with("bind failed: "));
        assert!(!err.is_state_error());
    }

    #[test]
    fn state_errors_have_no_code() {
        assert_eq!(TransportError::AlreadyClosed.native_code(), None);
        assert!(TransportError::NotBound.is_state_error());
        assert!(TransportError::Unsupported("bind").is_state_error());
    }

    #[test]
    fn path_errors_name_the_path() {
        let err = TransportError::InvalidPath {
            path: PathBuf::from("/tmp/a\0b"),
            reason: "contains a NUL byte",
        };
        assert!(err.to_string().contains("contains a NUL byte"));
        let long = TransportError::PathTooLong {
            path: PathBuf::from("/tmp/long.sock"),
            len: 200,
            max: 107,
        };
        assert!(long.to_string().ends_with("/tmp/long.sock"));
    }
}
