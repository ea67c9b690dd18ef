use std::io::{self, Read, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use localsock_transport::{local, Connection};

use crate::cmd::{bind_listener, install_ctrlc_handler, shutdown_listener, EchoArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

const BUFFER_SIZE: usize = 8192;

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let listener = bind_listener(&args.path)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), listener.clone())?;

    let served = local::serve(listener.as_ref(), &running, |conn| {
        let handle = conn.handle().as_raw();
        let spawned = thread::Builder::new()
            .name(format!("echo-{handle}"))
            .spawn(move || match echo_connection(conn) {
                Ok(bytes) => tracing::info!(handle, bytes, "client disconnected"),
                Err(err) => tracing::warn!(handle, error = %err, "echo failed"),
            });
        if let Err(err) = spawned {
            tracing::warn!(handle, error = %err, "failed to spawn echo worker");
        }
    })
    .map_err(|err| transport_error("accept failed", err))?;

    tracing::info!(connections = served, "echo server stopped");
    shutdown_listener(listener.as_ref())?;
    Ok(SUCCESS)
}

/// Copy everything read from `conn` back to it until the peer hangs up.
fn echo_connection(mut conn: Connection) -> io::Result<u64> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match conn.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        conn.write_all(&buf[..n])?;
        total += n as u64;
    }
    conn.close().map_err(io::Error::other)?;
    Ok(total)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/lsockcli-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("echo.sock")
    }

    #[test]
    fn echoes_until_peer_hangs_up() {
        let path = make_sock_path("echo");
        let listener = local::bind(&path).expect("bind should succeed");

        let client_path = path.clone();
        let client = thread::spawn(move || {
            let mut conn = local::connect(&client_path).expect("connect should succeed");
            conn.write_all(b"round trip").expect("client write");
            let mut reply = [0u8; 10];
            conn.read_exact(&mut reply).expect("client read");
            conn.close().expect("client close");
            reply
        });

        let conn = listener.accept().expect("accept should succeed");
        let echoed = echo_connection(conn).expect("echo should finish cleanly");
        assert_eq!(echoed, 10);
        assert_eq!(&client.join().expect("client thread"), b"round trip");

        listener.close().expect("close should succeed");
        let _ = std::fs::remove_dir(path.parent().expect("parent"));
    }
}
