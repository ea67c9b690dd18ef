mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

/// `localsock`: run a local IPC listener from the shell.
///
/// Paths name a Unix domain socket file on Unix and a named pipe on Windows.
#[derive(Parser, Debug)]
#[command(name = "localsock", version, about = "Serve connections on a local IPC socket")]
struct Cli {
    /// How events and results are written to stdout.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Diagnostic log encoding on stderr.
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Diagnostics below this level are dropped.
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "LOCALSOCK_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

/// Run the parsed command and turn its outcome into a process exit code.
fn run(cli: Cli) -> i32 {
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            err.code
        }
    }
}

fn main() {
    std::process::exit(run(Cli::parse()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listen_with_count() {
        let cli = Cli::try_parse_from(["localsock", "listen", "/tmp/test.sock", "--count", "2"])
            .expect("listen args should parse");
        match cli.command {
            Command::Listen(args) => assert_eq!(args.count, Some(2)),
            other => panic!("expected listen, got {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "localsock",
            "echo",
            "/tmp/test.sock",
            "--format",
            "pretty",
            "--log-format",
            "json",
        ])
        .expect("global flags should parse after the subcommand");
        assert!(matches!(cli.command, Command::Echo(_)));
        assert_eq!(cli.format, Some(OutputFormat::Pretty));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_non_numeric_count() {
        let err = Cli::try_parse_from(["localsock", "listen", "/tmp/test.sock", "--count", "many"])
            .expect_err("count must be numeric");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn echo_requires_path() {
        let err = Cli::try_parse_from(["localsock", "echo"]).expect_err("path is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
