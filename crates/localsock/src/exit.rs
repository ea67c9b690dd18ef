//! Process exit codes and the mapping from transport failures onto them.

use std::fmt;
use std::io;

use localsock_transport::TransportError;

pub const SUCCESS: i32 = 0;
/// Generic failure, including "nothing is listening there".
pub const FAILURE: i32 = 1;
/// The socket layer refused an operation.
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
/// A peer sent bytes the command could not accept.
pub const DATA_INVALID: i32 = 60;
/// The command line named something that can never work, such as an unusable path.
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
/// Unclassified local failure.
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A failure that ends the command, carrying the code the process exits with.
#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Exit code for the I/O kinds a user can act on; `None` leaves the caller's default.
fn code_for_kind(kind: io::ErrorKind) -> Option<i32> {
    match kind {
        io::ErrorKind::PermissionDenied => Some(PERMISSION_DENIED),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Some(TIMEOUT),
        io::ErrorKind::InvalidData => Some(DATA_INVALID),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => Some(FAILURE),
        _ => None,
    }
}

/// Wrap a plain I/O failure, prefixing `context` to the message.
pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = code_for_kind(err.kind()).unwrap_or(INTERNAL);
    CliError::new(code, format!("{context}: {err}"))
}

/// Wrap a listener failure. Bad paths are usage errors; native call failures
/// are classified by their I/O kind and otherwise count as transport errors.
pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::PathTooLong { .. } | TransportError::InvalidPath { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        TransportError::NativeCall { ref source, .. } => {
            let code = code_for_kind(source.kind()).unwrap_or(TRANSPORT_ERROR);
            CliError::new(code, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}
