use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Subcommand};
use localsock_transport::{local, ServerSocket};

use crate::exit::{transport_error, CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and echo every byte back.
    Echo(EchoArgs),
    /// Accept connections and report what each client sent.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Socket path (Unix) or pipe name (Windows) to listen on.
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path (Unix) or pipe name (Windows) to listen on.
    pub path: PathBuf,
    /// Exit after N connections have finished.
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn bind_listener(path: &std::path::Path) -> CliResult<Arc<dyn ServerSocket>> {
    let listener = local::bind(path).map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(
        path = %path.display(),
        transport = listener.transport_name(),
        "listening"
    );
    Ok(Arc::from(listener))
}

/// Ctrl-C clears `running` and closes the listener, which unblocks `accept`.
pub(crate) fn install_ctrlc_handler(
    running: Arc<AtomicBool>,
    listener: Arc<dyn ServerSocket>,
) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        if let Err(err) = listener.close() {
            tracing::debug!(error = %err, "listener close on interrupt failed");
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Close the listener unless the interrupt handler already did.
pub(crate) fn shutdown_listener(listener: &dyn ServerSocket) -> CliResult<()> {
    match listener.close() {
        Ok(()) => Ok(()),
        Err(err) if err.is_state_error() => Ok(()),
        Err(err) => Err(transport_error("close failed", err)),
    }
}
