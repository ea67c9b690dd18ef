//! Local IPC server sockets.
//!
//! One listener contract, [`ServerSocket`], over two native transports:
//! - Unix domain stream sockets ([`UnixServerSocket`]), driven through raw
//!   `socket`/`bind`/`listen`/`accept` so a blocked `accept` can be woken by
//!   `close` from another thread
//! - Windows named pipes ([`PipeServerSocket`]), where every `accept` creates
//!   a fresh overlapped pipe instance tracked by a [`HandleRegistry`]
//!
//! Accepted clients come back as [`Connection`]s that implement
//! [`std::io::Read`] and [`std::io::Write`] and release their handle exactly
//! once. The [`local`] module picks the host transport for a path.

pub mod config;
pub mod connection;
pub mod error;
pub mod local;
pub mod pipe;
pub mod registry;
pub mod sys;
pub mod traits;

#[cfg(unix)]
pub mod address;
#[cfg(unix)]
pub mod uds;

pub use config::{PipeListenerConfig, UnixListenerConfig};
pub use connection::{CloseCallback, Connection, HandleKind, NativeHandle};
pub use error::{NativeOp, Result, TransportError};
pub use pipe::PipeServerSocket;
pub use registry::HandleRegistry;
pub use traits::{ListenerAddress, ServerSocket};

#[cfg(unix)]
pub use address::{AddressEncoder, NativeAddressRecord};
#[cfg(unix)]
pub use uds::{ListenerState, UnixServerSocket};
