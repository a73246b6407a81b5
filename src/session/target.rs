//! Target side of a launch
//!
//! Runs only in the forked child. Turns the two slave PTYs into the
//! process's standard streams, makes the stdio slave the controlling terminal
//! of a fresh session, then replaces the process image with the requested
//! program. Nothing here returns.

use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::termios::{self, SetArg};
use nix::unistd::{close, dup2, execvp, setsid};

use super::TargetCommand;
use crate::pty::{PtyError, PtyResult};

/// Exit code when the program could not be found
const EXIT_NOT_FOUND: i32 = 127;
/// Exit code when the program was found but could not be executed
const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit code when configuring the terminal session failed
const EXIT_SETUP: i32 = 1;

/// Signals whose disposition is reset before exec
const RESET_SIGNALS: [Signal; 7] = [
    Signal::SIGCHLD,
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGALRM,
    Signal::SIGPIPE,
];

/// Put the terminal behind `fd` into raw mode
///
/// Disables canonical input, echo, signal characters and output
/// post-processing so bytes pass through the line discipline untouched.
pub fn make_raw(fd: BorrowedFd<'_>) -> PtyResult<()> {
    let mut attrs = termios::tcgetattr(fd).map_err(PtyError::Termios)?;
    termios::cfmakeraw(&mut attrs);
    termios::tcsetattr(fd, SetArg::TCSANOW, &attrs).map_err(PtyError::Termios)
}

/// Everything the target role owns after the split
pub struct TargetSession {
    stdio_slave: OwnedFd,
    stderr_slave: OwnedFd,
    command: TargetCommand,
}

impl TargetSession {
    pub(super) fn new(stdio_slave: OwnedFd, stderr_slave: OwnedFd, command: TargetCommand) -> Self {
        Self {
            stdio_slave,
            stderr_slave,
            command,
        }
    }

    /// Configure the terminal session and exec the program
    pub fn exec(self) -> ! {
        let command = match self.configure() {
            Ok(command) => command,
            Err(err) => {
                let _ = writeln!(io::stderr(), "faketty: {err}");
                exit_now(EXIT_SETUP);
            }
        };

        reset_signal_dispositions();

        let errno = match execvp(command.program(), command.argv()) {
            Ok(never) => match never {},
            Err(errno) => errno,
        };

        let _ = writeln!(
            io::stderr(),
            "faketty: {}: {}",
            command.program().to_string_lossy(),
            errno.desc()
        );
        exit_now(if errno == Errno::ENOENT {
            EXIT_NOT_FOUND
        } else {
            EXIT_NOT_EXECUTABLE
        });
    }

    /// Steps before exec, in order; hands back the command to run
    fn configure(self) -> PtyResult<TargetCommand> {
        let TargetSession {
            stdio_slave,
            stderr_slave,
            command,
        } = self;

        // Raw mode is best effort: a cooked PTY beats not running at all
        for slave in [stdio_slave.as_fd(), stderr_slave.as_fd()] {
            if let Err(err) = make_raw(slave) {
                tracing::debug!(%err, "raw mode not applied");
            }
        }

        // The inherited streams may already be closed
        for fd in [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO] {
            let _ = close(fd);
        }

        dup2(stdio_slave.as_raw_fd(), STDIN_FILENO).map_err(PtyError::Dup2)?;
        dup2(stdio_slave.as_raw_fd(), STDOUT_FILENO).map_err(PtyError::Dup2)?;
        dup2(stderr_slave.as_raw_fd(), STDERR_FILENO).map_err(PtyError::Dup2)?;

        // Only the rebound slots stay open
        drop(stdio_slave);
        drop(stderr_slave);

        setsid().map_err(PtyError::Setsid)?;

        // SAFETY: TIOCSCTTY takes an integer argument and touches no memory
        // of ours
        let result = unsafe { libc::ioctl(STDIN_FILENO, libc::TIOCSCTTY as _, 0) };
        if result < 0 {
            return Err(PtyError::SetControllingTerminal(Errno::last()));
        }

        Ok(command)
    }
}

fn reset_signal_dispositions() {
    for sig in RESET_SIGNALS {
        // SAFETY: installing SIG_DFL does not run any handler code
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }
}

/// Leave the forked child without running the parent's exit handlers or
/// flushing buffers it inherited
fn exit_now(code: i32) -> ! {
    // SAFETY: _exit is async-signal-safe and never returns
    unsafe { libc::_exit(code) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::termios::{LocalFlags, OutputFlags};

    use crate::pty::{Channel, PtyPair};

    #[test]
    fn test_make_raw_clears_line_discipline() {
        let pair = PtyPair::open(Channel::Stdio).expect("Failed to open stdio pair");
        make_raw(pair.slave()).expect("Failed to set raw mode");

        let attrs = termios::tcgetattr(pair.slave()).expect("Failed to read attributes");
        assert!(!attrs.local_flags.contains(LocalFlags::ICANON));
        assert!(!attrs.local_flags.contains(LocalFlags::ECHO));
        assert!(!attrs.local_flags.contains(LocalFlags::ISIG));
        assert!(!attrs.output_flags.contains(OutputFlags::OPOST));
    }

    #[test]
    fn test_make_raw_on_write_only_slave() {
        let pair = PtyPair::open(Channel::Stderr).expect("Failed to open stderr pair");
        make_raw(pair.slave()).expect("Failed to set raw mode");

        let attrs = termios::tcgetattr(pair.slave()).expect("Failed to read attributes");
        assert!(!attrs.local_flags.contains(LocalFlags::ECHO));
    }

    #[test]
    fn test_make_raw_rejects_non_terminal() {
        let file = tempfile::tempfile().expect("Failed to create temp file");
        assert!(matches!(
            make_raw(file.as_fd()),
            Err(PtyError::Termios(Errno::ENOTTY))
        ));
    }
}
