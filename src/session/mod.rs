//! Launching a program behind two PTY pairs
//!
//! A launch runs in three phases:
//!
//! 1. [`Launch::prepare`] allocates the stdio and stderr pairs.
//! 2. [`Launch::split`] forks and hands each process exactly the descriptors
//!    its role needs, as a [`ProcessRole`].
//! 3. The relay role runs [`RelaySession::run`]; the target role runs
//!    [`TargetSession::exec`], which never returns.

use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{fork, ForkResult};

mod relay;
mod status;
mod target;

pub use relay::{RelaySession, StdStreams};
pub use status::{ExitStatus, SETUP_FAILURE_CODE};
pub use target::{make_raw, TargetSession};

use crate::config::RelayConfig;
use crate::pty::{Channel, PtyError, PtyPair, PtyResult};

/// Program and arguments to exec in the target role
///
/// Converted to C strings up front so nothing is allocated between the fork
/// and the exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCommand {
    argv: Vec<CString>,
}

impl TargetCommand {
    /// Build from `PROG [ARGS...]`; the program is looked up in `PATH`
    pub fn new<I, S>(args: I) -> PtyResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let argv = args
            .into_iter()
            .map(|arg| CString::new(arg.as_ref().as_bytes()).map_err(PtyError::InvalidArgument))
            .collect::<PtyResult<Vec<_>>>()?;

        if argv.is_empty() {
            return Err(PtyError::EmptyCommand);
        }
        Ok(Self { argv })
    }

    /// The program name as given (`argv[0]`)
    pub fn program(&self) -> &CStr {
        // new() rejects an empty argv
        &self.argv[0]
    }

    /// Full argument vector including `argv[0]`
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }
}

/// Which side of the fork this process ended up on
pub enum ProcessRole {
    /// The parent process: relays I/O and waits for the target
    Relay(RelaySession),
    /// The forked child: becomes the requested program
    Target(TargetSession),
}

/// Both PTY pairs plus what to run, ready to split
#[derive(Debug)]
pub struct Launch {
    stdio: PtyPair,
    stderr: PtyPair,
    command: TargetCommand,
    config: RelayConfig,
}

impl Launch {
    /// Allocate the stdio and stderr pairs
    ///
    /// Both slaves are put into raw mode here already so input the relay
    /// forwards before the target has configured itself is not echoed or
    /// line-edited. Failures of that step are ignored.
    pub fn prepare(command: TargetCommand, config: RelayConfig) -> PtyResult<Self> {
        let stdio = PtyPair::open(Channel::Stdio)?;
        let stderr = PtyPair::open(Channel::Stderr)?;

        if config.inherit_window_size {
            if let Some(size) = StdStreams::process().window_size() {
                for pair in [&stdio, &stderr] {
                    if let Err(err) = pair.set_window_size(size) {
                        tracing::debug!(%err, "window size not inherited");
                    }
                }
            }
        }

        for pair in [&stdio, &stderr] {
            if let Err(err) = make_raw(pair.slave()) {
                tracing::debug!(
                    channel = %pair.channel(),
                    %err,
                    "raw mode not applied before split"
                );
            }
        }

        Ok(Self {
            stdio,
            stderr,
            command,
            config,
        })
    }

    /// Fork into the relay and target roles
    ///
    /// The relay keeps the masters and closes the slaves; the target keeps
    /// the slaves and closes the masters.
    pub fn split(self) -> PtyResult<ProcessRole> {
        let Launch {
            stdio,
            stderr,
            command,
            config,
        } = self;
        let (stdio_master, stdio_slave) = stdio.into_parts();
        let (stderr_master, stderr_slave) = stderr.into_parts();

        // SAFETY: the child only rebinds descriptors, changes its session and
        // execs; the arguments were converted before the fork
        match unsafe { fork() }.map_err(PtyError::Fork)? {
            ForkResult::Parent { child } => {
                drop(stdio_slave);
                drop(stderr_slave);
                tracing::debug!(%child, "forked target");
                Ok(ProcessRole::Relay(RelaySession::new(
                    child,
                    stdio_master,
                    stderr_master,
                    config,
                )))
            },
            ForkResult::Child => {
                drop(stdio_master);
                drop(stderr_master);
                Ok(ProcessRole::Target(TargetSession::new(
                    stdio_slave,
                    stderr_slave,
                    command,
                )))
            },
        }
    }
}

/// Run `args` (program first) behind PTYs and return its exit status
///
/// Only the relay role returns from this function.
pub fn launch<I, S>(args: I, config: RelayConfig) -> PtyResult<ExitStatus>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let command = TargetCommand::new(args)?;
    match Launch::prepare(command, config)?.split()? {
        ProcessRole::Relay(relay) => relay.run(&StdStreams::process()),
        ProcessRole::Target(target) => target.exec(),
    }
}

/// Put `SIGPIPE` back to its default disposition
///
/// The Rust runtime ignores it, and an ignored disposition would survive the
/// exec into the target. With the default, a relay whose stdout reader went
/// away terminates the way a plain pipeline stage would.
pub fn restore_default_sigpipe() {
    // SAFETY: installing SIG_DFL does not run any handler code
    if let Err(err) = unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) } {
        tracing::debug!(%err, "SIGPIPE disposition unchanged");
    }
}
