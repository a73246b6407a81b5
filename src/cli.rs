//! Command-line handling
//!
//! `--help` and `--version` are only recognised as the sole argument;
//! anything else is the program to run, so `faketty ls --help` passes
//! `--help` on to `ls`.

use std::ffi::OsString;

/// What an invocation asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// No arguments: print usage, exit 1
    Usage,
    /// `--help`: print usage, exit 0
    Help,
    /// `--version`: print version, exit 0
    Version,
    /// `PROG [ARGS...]`
    Launch(Vec<OsString>),
}

impl Invocation {
    /// Classify the arguments following `argv[0]`
    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        match args.as_slice() {
            [] => Invocation::Usage,
            [only] if only == "--help" => Invocation::Help,
            [only] if only == "--version" => Invocation::Version,
            _ => Invocation::Launch(args),
        }
    }
}

/// Usage text printed for no arguments and `--help`
pub fn usage() -> String {
    format!(
        "\
faketty executes the specified program with its stdin, stdout and stderr
routed through pseudo-terminal (PTY) devices. Programs that change their
behaviour when not attached to a terminal (colors, progress output, line
buffering) behave as if run from an interactive shell, even when faketty
itself is fed from a pipe or redirected to a file.

Usage: faketty PROG [ARGS..]

Examples:
faketty cc 2> /tmp/err.txt ; cat /tmp/err.txt
        runs the system C compiler without an input file, sending its
        (terminal-formatted) error message to a file, then shows the file.

faketty ls --color=auto | cat
        lists files in color even though the output is a pipe.

Set FAKETTY_LOG=debug to trace the relay on stderr.

faketty {}
",
        env!("CARGO_PKG_VERSION")
    )
}

/// Version text printed for `--version`
pub fn version() -> String {
    format!(
        "\
faketty v{}

Distributed under the {} license.
",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_LICENSE")
    )
}
