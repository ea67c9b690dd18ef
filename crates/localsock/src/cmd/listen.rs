use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use localsock_transport::{local, Connection};

use crate::cmd::{bind_listener, install_ctrlc_handler, shutdown_listener, ListenArgs};
use crate::exit::{io_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{
    payload_preview, print_event, print_raw, ConnectionEvent, OutputFormat, PREVIEW_LIMIT,
};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = bind_listener(&args.path)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), listener.clone())?;

    let transport = listener.transport_name();
    let path = args.path.display().to_string();
    let mut sequence = 0u64;
    let mut failure: Option<CliError> = None;

    local::serve(listener.as_ref(), &running, |conn| {
        sequence += 1;
        let handle = conn.handle().as_raw();
        let mut event = ConnectionEvent::closed(transport, path.clone(), sequence, handle);
        match drain(conn, &mut event, format) {
            Ok(()) => print_event(&event, format),
            Err(err) => {
                failure = Some(io_error("receive failed", err));
                running.store(false, Ordering::SeqCst);
                return;
            }
        }
        if args.count.is_some_and(|count| sequence >= count) {
            running.store(false, Ordering::SeqCst);
        }
    })
    .map_err(|err| transport_error("accept failed", err))?;

    shutdown_listener(listener.as_ref())?;
    match failure {
        Some(err) => Err(err),
        None => Ok(SUCCESS),
    }
}

/// Read until the peer hangs up, filling in the byte count and preview.
fn drain(
    mut conn: Connection,
    event: &mut ConnectionEvent,
    format: OutputFormat,
) -> io::Result<()> {
    let started = Instant::now();
    let mut buf = [0u8; 8192];
    let mut head = Vec::with_capacity(PREVIEW_LIMIT + 1);
    loop {
        let n = match conn.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if format == OutputFormat::Raw {
            print_raw(&buf[..n]);
        }
        let room = (PREVIEW_LIMIT + 1).saturating_sub(head.len());
        head.extend_from_slice(&buf[..n.min(room)]);
        event.bytes_received += n as u64;
    }
    event.preview = payload_preview(&head);
    event.duration_ms = started.elapsed().as_millis();
    conn.close().map_err(io::Error::other)
}
