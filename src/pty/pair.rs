//! Unix PTY pair allocation
//!
//! Opens one master/slave pair per call using the POSIX PTY functions.
//!
//! # References
//!
//! - posix_openpt(3): https://man7.org/linux/man-pages/man3/posix_openpt.3.html
//! - grantpt(3), unlockpt(3), ptsname(3)
//! - tty_ioctl(4): https://man7.org/linux/man-pages/man4/tty_ioctl.4.html

use std::fs::OpenOptions;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::libc::{self, STDERR_FILENO};
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};

use super::{Channel, PtyError, PtyResult, WindowSize};

/// The two ends of one kernel pseudoterminal
///
/// `master` is driven by the relay; `slave` becomes one or more of the
/// target's standard streams. Both descriptors are kept above the standard
/// slots 0..=2 so rebinding the target's streams never clobbers them.
#[derive(Debug)]
pub struct PtyPair {
    channel: Channel,
    master: OwnedFd,
    slave: OwnedFd,
    slave_path: PathBuf,
}

impl PtyPair {
    /// Allocate a new pair for `channel`
    ///
    /// The stdio pair is read-write on both ends. The stderr pair's master is
    /// read-only and its slave write-only, since the target only ever writes
    /// to its stderr.
    pub fn open(channel: Channel) -> PtyResult<Self> {
        let master_mode = match channel {
            Channel::Stdio => OFlag::O_RDWR,
            Channel::Stderr => OFlag::O_RDONLY,
        };
        let master = posix_openpt(master_mode | OFlag::O_NOCTTY)
            .map_err(|source| PtyError::OpenMaster { channel, source })?;

        let slave_path = PathBuf::from(
            slave_name(&master).map_err(|source| PtyError::PtsName { channel, source })?,
        );

        grantpt(&master).map_err(|source| PtyError::GrantPty { channel, source })?;
        unlockpt(&master).map_err(|source| PtyError::UnlockPty { channel, source })?;

        // SAFETY: into_raw_fd releases the descriptor from PtyMaster, so the
        // OwnedFd is its only owner
        let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };

        // Keep the master out of programs exec'd by anyone but us
        if let Err(err) = fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
            tracing::debug!(channel = %channel, %err, "close-on-exec not set on master");
        }

        // The relay must never block on a master: the target may be stuck
        // writing output only the relay can drain
        set_nonblocking(master.as_fd())
            .map_err(|source| PtyError::SetNonblocking { channel, source })?;

        let slave = OpenOptions::new()
            .read(channel == Channel::Stdio)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&slave_path)
            .map_err(|source| PtyError::OpenSlave { channel, source })?;

        let pair = Self {
            channel,
            master: above_stdio(master, channel)?,
            slave: above_stdio(OwnedFd::from(slave), channel)?,
            slave_path,
        };
        tracing::debug!(
            channel = %channel,
            slave = %pair.slave_path.display(),
            master_fd = pair.master.as_raw_fd(),
            slave_fd = pair.slave.as_raw_fd(),
            "allocated pty pair"
        );
        Ok(pair)
    }

    /// The stream(s) this pair carries
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Master end, driven by the relay
    pub fn master(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    /// Slave end, handed to the target
    pub fn slave(&self) -> BorrowedFd<'_> {
        self.slave.as_fd()
    }

    /// Device path of the slave end (e.g. `/dev/pts/3`)
    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }

    /// Apply a window size to the pseudoterminal
    pub fn set_window_size(&self, size: WindowSize) -> PtyResult<()> {
        let ws: libc::winsize = size.into();

        // SAFETY: TIOCSWINSZ reads a winsize from the pointer we pass
        let result = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if result < 0 {
            return Err(PtyError::SetWindowSize {
                channel: self.channel,
                source: nix::errno::Errno::last(),
            });
        }
        Ok(())
    }

    /// Split into `(master, slave)`, giving up the pairing
    pub fn into_parts(self) -> (OwnedFd, OwnedFd) {
        (self.master, self.slave)
    }
}

/// Window size of the terminal behind `fd`, if it is one and has been sized
pub fn window_size_of(fd: BorrowedFd<'_>) -> Option<WindowSize> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ writes a winsize through the pointer we pass
    let result = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut ws) };
    if result < 0 {
        return None;
    }

    let size = WindowSize::from(ws);
    (!size.is_unset()).then_some(size)
}

#[cfg(target_os = "linux")]
fn slave_name(master: &PtyMaster) -> nix::Result<String> {
    nix::pty::ptsname_r(master)
}

#[cfg(not(target_os = "linux"))]
fn slave_name(master: &PtyMaster) -> nix::Result<String> {
    // SAFETY: ptsname returns a static buffer; the name is copied out before
    // any other PTY call and the process is still single-threaded here
    unsafe { nix::pty::ptsname(master) }
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Move `fd` out of slots 0..=2 if the invoker started us with a closed
/// standard stream and the kernel handed one of those slots to the PTY
fn above_stdio(fd: OwnedFd, channel: Channel) -> PtyResult<OwnedFd> {
    if fd.as_raw_fd() > STDERR_FILENO {
        return Ok(fd);
    }
    // try_clone duplicates with F_DUPFD_CLOEXEC starting at 3; the low slot
    // is released when `fd` drops
    fd.try_clone()
        .map_err(|source| PtyError::Relocate { channel, source })
}
