//! Exit status of a relayed program

use std::fmt;
use std::process::ExitCode;

use nix::sys::signal::Signal;

/// Code returned when the launch fails before a target is running
/// (`-1` as the shell sees it)
pub const SETUP_FAILURE_CODE: u8 = 255;

/// How the launch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The target exited normally with this code
    Exited(i32),
    /// The target was killed by a signal
    Signaled(Signal),
    /// PTY allocation or the fork failed; no target ran
    SetupFailed,
}

impl ExitStatus {
    /// The byte handed back to the invoking shell
    ///
    /// Signal deaths follow the shell convention of `128 + signal`.
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Exited(code) => (code & 0xff) as u8,
            ExitStatus::Signaled(signal) => {
                u8::try_from(128 + signal as i32).unwrap_or(SETUP_FAILURE_CODE)
            }
            ExitStatus::SetupFailed => SETUP_FAILURE_CODE,
        }
    }

    pub fn success(self) -> bool {
        self == ExitStatus::Exited(0)
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with code {code}"),
            ExitStatus::Signaled(signal) => write!(f, "killed by {signal}"),
            ExitStatus::SetupFailed => f.write_str("setup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_pass_through() {
        assert_eq!(ExitStatus::Exited(0).code(), 0);
        assert_eq!(ExitStatus::Exited(7).code(), 7);
        assert_eq!(ExitStatus::Exited(255).code(), 255);
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Exited(1).success());
    }

    #[test]
    fn test_signal_codes() {
        assert_eq!(ExitStatus::Signaled(Signal::SIGKILL).code(), 137);
        assert_eq!(ExitStatus::Signaled(Signal::SIGINT).code(), 130);
        assert!(!ExitStatus::Signaled(Signal::SIGTERM).success());
    }

    #[test]
    fn test_setup_failure_sentinel() {
        assert_eq!(ExitStatus::SetupFailed.code(), SETUP_FAILURE_CODE);
        assert_eq!(SETUP_FAILURE_CODE as i8, -1);
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitStatus::Exited(3).to_string(), "exited with code 3");
        assert_eq!(
            ExitStatus::Signaled(Signal::SIGKILL).to_string(),
            "killed by SIGKILL"
        );
    }
}
