//! PTY (Pseudoterminal) allocation
//!
//! This module opens the master/slave pseudoterminal pairs a relayed program
//! runs behind. Two independent pairs are used per launch: one carries the
//! program's stdin and stdout, the other carries its stderr.

use std::fmt;
use std::io;

#[cfg(unix)]
mod pair;

#[cfg(unix)]
pub use pair::{window_size_of, PtyPair};

/// Which standard stream(s) a PTY pair carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Combined stdin and stdout of the target
    Stdio,
    /// Stderr of the target; the relay only ever reads from this master
    Stderr,
}

impl Channel {
    /// Short lowercase name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Channel::Stdio => "stdio",
            Channel::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error type for PTY and launch operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("error opening parent {channel} pty (posix_openpt: {source})")]
    OpenMaster {
        channel: Channel,
        #[source]
        source: nix::Error,
    },

    #[error("error opening parent {channel} pty (ptsname: {source})")]
    PtsName {
        channel: Channel,
        #[source]
        source: nix::Error,
    },

    #[error("error opening parent {channel} pty (grantpt: {source})")]
    GrantPty {
        channel: Channel,
        #[source]
        source: nix::Error,
    },

    #[error("error opening parent {channel} pty (unlockpt: {source})")]
    UnlockPty {
        channel: Channel,
        #[source]
        source: nix::Error,
    },

    #[error("error opening parent {channel} pty (O_NONBLOCK: {source})")]
    SetNonblocking {
        channel: Channel,
        #[source]
        source: nix::Error,
    },

    #[error("error opening child {channel} pty ({source})")]
    OpenSlave {
        channel: Channel,
        #[source]
        source: io::Error,
    },

    #[error("error moving {channel} pty descriptor out of the standard slots ({source})")]
    Relocate {
        channel: Channel,
        #[source]
        source: io::Error,
    },

    #[error("error setting {channel} pty window size ({source})")]
    SetWindowSize {
        channel: Channel,
        #[source]
        source: nix::Error,
    },

    #[error("error setting terminal attributes ({0})")]
    Termios(#[source] nix::Error),

    #[error("error forking target process ({0})")]
    Fork(#[source] nix::Error),

    #[error("error creating session ({0})")]
    Setsid(#[source] nix::Error),

    #[error("error setting controlling terminal ({0})")]
    SetControllingTerminal(#[source] nix::Error),

    #[error("error duplicating file descriptor ({0})")]
    Dup2(#[source] nix::Error),

    #[error("error waiting for target process ({0})")]
    Wait(#[source] nix::Error),

    #[error("no program given")]
    EmptyCommand,

    #[error("argument contains an interior NUL byte ({0})")]
    InvalidArgument(#[source] std::ffi::NulError),
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Window size for PTY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowSize {
    /// Create a new window size with just rows and columns
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// A size the kernel reports for a terminal nobody has sized yet
    pub fn is_unset(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<WindowSize> for nix::libc::winsize {
    fn from(ws: WindowSize) -> Self {
        nix::libc::winsize {
            ws_row: ws.rows,
            ws_col: ws.cols,
            ws_xpixel: ws.pixel_width,
            ws_ypixel: ws.pixel_height,
        }
    }
}

impl From<nix::libc::winsize> for WindowSize {
    fn from(ws: nix::libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Stdio.to_string(), "stdio");
        assert_eq!(Channel::Stderr.to_string(), "stderr");
    }

    #[test]
    fn test_allocation_errors_name_the_pair() {
        let err = PtyError::GrantPty {
            channel: Channel::Stderr,
            source: nix::errno::Errno::EACCES,
        };
        let text = err.to_string();
        assert!(text.starts_with("error opening parent stderr pty"), "{text}");
        assert!(text.contains("grantpt"), "{text}");

        let err = PtyError::OpenSlave {
            channel: Channel::Stdio,
            source: io::Error::from_raw_os_error(nix::libc::ENOENT),
        };
        assert!(err
            .to_string()
            .starts_with("error opening child stdio pty"));
    }

    #[test]
    fn test_window_size_to_libc() {
        let ws = WindowSize {
            rows: 30,
            cols: 100,
            pixel_width: 800,
            pixel_height: 600,
        };
        let libc_ws: nix::libc::winsize = ws.into();
        assert_eq!(libc_ws.ws_row, 30);
        assert_eq!(libc_ws.ws_col, 100);
        assert_eq!(WindowSize::from(libc_ws), ws);
    }

    #[test]
    fn test_window_size_unset() {
        assert!(WindowSize::new(0, 0).is_unset());
        assert!(!WindowSize::default().is_unset());
    }
}
