//! faketty
//!
//! Runs `PROG [ARGS...]` with its stdin, stdout and stderr routed through
//! pseudoterminals and exits with the program's exit code.

use std::io;
use std::process::ExitCode;

use faketty::cli::{self, Invocation};
use faketty::session::restore_default_sigpipe;
use faketty::{ExitStatus, RelayConfig};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    // Relay diagnostics share stderr with the target, so stay quiet unless asked
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("FAKETTY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    restore_default_sigpipe();

    match Invocation::parse(std::env::args_os().skip(1)) {
        Invocation::Usage => {
            print!("{}", cli::usage());
            ExitCode::from(1)
        },
        Invocation::Help => {
            print!("{}", cli::usage());
            ExitCode::SUCCESS
        },
        Invocation::Version => {
            print!("{}", cli::version());
            ExitCode::SUCCESS
        },
        Invocation::Launch(args) => match faketty::launch(&args, RelayConfig::default()) {
            Ok(status) => {
                tracing::debug!(%status, "target finished");
                status.into()
            },
            Err(err) => {
                eprintln!("faketty: {err}, exiting.");
                ExitStatus::SetupFailed.into()
            },
        },
    }
}
