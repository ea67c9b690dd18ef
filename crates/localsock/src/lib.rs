//! Local IPC server sockets.
//!
//! A single listener contract over Unix domain sockets and Windows named
//! pipes. See [`transport`] for the listener types and [`transport::local`]
//! for the host-platform helpers.

/// Re-export transport types.
pub mod transport {
    pub use localsock_transport::*;
}
