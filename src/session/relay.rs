//! Relay side of a launch
//!
//! A single-threaded readiness loop moving bytes along three routes:
//!
//! - real stdin      -> stdio PTY master (the target's stdin)
//! - stdio master    -> real stdout
//! - stderr master   -> real stderr
//!
//! Every iteration waits at most one poll interval, forwards one buffer per
//! ready source, then checks the target with a non-blocking `waitpid`. The
//! target exiting is the only way out of the loop; stream EOF and I/O errors
//! are not.
//!
//! The masters are non-blocking. Stdin the stdio master cannot take yet is
//! held back, and stdin is not read again until it has been flushed, so the
//! relay keeps draining the target's output while the target is not reading.

use std::io::IsTerminal;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{read, write, Pid};

use super::ExitStatus;
use crate::config::RelayConfig;
use crate::pty::{window_size_of, PtyError, PtyResult, WindowSize};

/// Upper bound on read passes when flushing leftovers after the target exits,
/// in case something else still holds the slave open and keeps writing
const MAX_DRAIN_PASSES: usize = 64;

/// The invoker-facing side of the relay
#[derive(Debug, Clone, Copy)]
pub struct StdStreams<'a> {
    pub input: BorrowedFd<'a>,
    pub output: BorrowedFd<'a>,
    pub error: BorrowedFd<'a>,
}

impl StdStreams<'static> {
    /// This process's own stdin, stdout and stderr
    pub fn process() -> Self {
        // SAFETY: slots 0..=2 are never closed by this crate's relay role. If
        // the invoker left one closed, poll reports POLLNVAL and writes fail
        // with EBADF, and both are absorbed by the loop.
        unsafe {
            Self {
                input: BorrowedFd::borrow_raw(STDIN_FILENO),
                output: BorrowedFd::borrow_raw(STDOUT_FILENO),
                error: BorrowedFd::borrow_raw(STDERR_FILENO),
            }
        }
    }
}

impl<'a> StdStreams<'a> {
    pub fn new(input: BorrowedFd<'a>, output: BorrowedFd<'a>, error: BorrowedFd<'a>) -> Self {
        Self {
            input,
            output,
            error,
        }
    }

    /// Size of the first of stdout, stdin, stderr that is a sized terminal
    pub fn window_size(&self) -> Option<WindowSize> {
        [self.output, self.input, self.error]
            .into_iter()
            .find_map(window_size_of)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Input,
    Output,
    Error,
}

const ROUTES: [Route; 3] = [Route::Input, Route::Output, Route::Error];

/// Result of one read/forward step on a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Moved(usize),
    Idle,
    Closed,
}

/// Everything the relay role owns after the split
///
/// Dropping it closes both PTY masters.
#[derive(Debug)]
pub struct RelaySession {
    child: Pid,
    stdio_master: OwnedFd,
    stderr_master: OwnedFd,
    config: RelayConfig,
}

impl RelaySession {
    pub fn new(
        child: Pid,
        stdio_master: OwnedFd,
        stderr_master: OwnedFd,
        config: RelayConfig,
    ) -> Self {
        Self {
            child,
            stdio_master,
            stderr_master,
            config,
        }
    }

    /// Process ID of the target
    pub fn child(&self) -> Pid {
        self.child
    }

    /// Relay until the target terminates and return its status
    pub fn run(self, streams: &StdStreams<'_>) -> PtyResult<ExitStatus> {
        let config = self.config.validated();
        let mut pump = Pump::new(
            streams,
            self.stdio_master.as_fd(),
            self.stderr_master.as_fd(),
            &config,
        );

        tracing::debug!(child = %self.child, "relay started");

        let status = loop {
            pump.step();
            if let Some(status) = try_wait(self.child)? {
                break status;
            }
        };

        pump.drain();
        tracing::debug!(child = %self.child, %status, "relay finished");
        Ok(status)
    }
}

/// Non-blocking check of the target's state
fn try_wait(child: Pid) -> PtyResult<Option<ExitStatus>> {
    match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, code)) => Ok(Some(ExitStatus::Exited(code))),
        Ok(WaitStatus::Signaled(_, signal, _)) => Ok(Some(ExitStatus::Signaled(signal))),
        Ok(_) => Ok(None),
        Err(Errno::EINTR) => Ok(None),
        // Someone else reaped it; nothing left to report
        Err(Errno::ECHILD) => Ok(Some(ExitStatus::Exited(0))),
        Err(err) => Err(PtyError::Wait(err)),
    }
}

/// Per-run state of the three routes
struct Pump<'a> {
    /// `(source, sink)` per route, indexed by `Route as usize`
    ends: [(BorrowedFd<'a>, BorrowedFd<'a>); 3],
    live: [bool; 3],
    /// Routes whose source hung up, left out of the poll set until then
    resting: [Option<Instant>; 3],
    input_is_terminal: bool,
    buf: Vec<u8>,
    /// Stdin bytes the stdio master has not accepted yet
    pending: Vec<u8>,
    timeout_ms: i32,
    interval: Duration,
}

/// One entry of the poll set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interest {
    /// Data to read on the route's source
    Read(Route),
    /// Room in the stdio master for pending stdin
    Flush,
}

impl<'a> Pump<'a> {
    fn new(
        streams: &StdStreams<'a>,
        stdio_master: BorrowedFd<'a>,
        stderr_master: BorrowedFd<'a>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            ends: [
                (streams.input, stdio_master),
                (stdio_master, streams.output),
                (stderr_master, streams.error),
            ],
            live: [true; 3],
            resting: [None; 3],
            input_is_terminal: streams.input.is_terminal(),
            buf: vec![0u8; config.buffer_size],
            pending: Vec::new(),
            timeout_ms: config.poll_timeout_ms(),
            interval: config.poll_interval,
        }
    }

    /// Wait for readiness once and forward one buffer per ready source
    fn step(&mut self) {
        let interests = self.interests(Instant::now());
        let targets: Vec<(BorrowedFd<'a>, PollFlags)> = interests
            .iter()
            .map(|interest| match interest {
                Interest::Read(route) => (self.ends[*route as usize].0, PollFlags::POLLIN),
                Interest::Flush => (self.ends[Route::Input as usize].1, PollFlags::POLLOUT),
            })
            .collect();

        let mut fds: Vec<PollFd<'_>> = targets
            .iter()
            .map(|(fd, flags)| PollFd::new(fd, *flags))
            .collect();

        match poll(&mut fds, self.timeout_ms) {
            Ok(0) => return,
            Ok(_) => {},
            Err(Errno::EINTR) => return,
            Err(err) => {
                // Keep the liveness cadence even if poll itself misbehaves
                tracing::warn!(%err, "poll failed");
                thread::sleep(self.interval);
                return;
            },
        }

        let ready: Vec<(Interest, PollFlags)> = interests
            .iter()
            .zip(fds.iter())
            .map(|(interest, fd)| (*interest, fd.revents().unwrap_or(PollFlags::empty())))
            .collect();

        for (interest, revents) in ready {
            match interest {
                Interest::Read(route) if revents.contains(PollFlags::POLLNVAL) => {
                    tracing::debug!(?route, "source is not an open descriptor, dropping route");
                    self.live[route as usize] = false;
                },
                Interest::Read(route)
                    if revents
                        .intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) =>
                {
                    // A hang-up is confirmed by the read itself (EOF or EIO)
                    self.pump(route);
                },
                Interest::Read(_) => {},
                Interest::Flush if revents.contains(PollFlags::POLLOUT) => self.flush(),
                Interest::Flush if !revents.is_empty() => {
                    // Hung up with no room: wait for the slave to come back
                    self.rest(Route::Output);
                },
                Interest::Flush => {},
            }
        }
    }

    /// What to poll for this iteration
    ///
    /// Stdin is not read while earlier stdin is still waiting for the stdio
    /// master; the master's write readiness is watched instead.
    fn interests(&mut self, now: Instant) -> Vec<Interest> {
        for slot in &mut self.resting {
            if slot.is_some_and(|until| until <= now) {
                *slot = None;
            }
        }

        let mut interests = Vec::with_capacity(ROUTES.len());
        for route in ROUTES {
            let idx = route as usize;
            if !self.live[idx] || self.resting[idx].is_some() {
                continue;
            }
            if route == Route::Input && !self.pending.is_empty() {
                continue;
            }
            interests.push(Interest::Read(route));
        }
        if !self.pending.is_empty() && self.resting[Route::Output as usize].is_none() {
            interests.push(Interest::Flush);
        }
        interests
    }

    /// Read once from the route's source and forward it in one write
    fn pump(&mut self, route: Route) -> Transfer {
        let (source, sink) = self.ends[route as usize];

        let n = match read(source.as_raw_fd(), &mut self.buf) {
            Ok(0) => return self.on_empty_read(route),
            Ok(n) => n,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => return Transfer::Idle,
            // A PTY master reports EIO while no slave descriptor is open; the
            // target can reopen it through /dev/tty later
            Err(Errno::EIO) => return self.rest(route),
            Err(Errno::EBADF) => return self.close(route),
            Err(err) => {
                tracing::trace!(?route, %err, "read failed, ignored");
                return Transfer::Idle;
            },
        };

        if route == Route::Input {
            self.forward_input(n);
            return Transfer::Moved(n);
        }

        match write(sink.as_raw_fd(), &self.buf[..n]) {
            Ok(written) if written < n => {
                tracing::trace!(?route, read = n, written, "short write, remainder dropped");
            },
            Ok(_) => tracing::trace!(?route, bytes = n, "forwarded"),
            Err(err) => tracing::trace!(?route, %err, "write failed, ignored"),
        }
        Transfer::Moved(n)
    }

    /// Hand `buf[..n]` to the stdio master, keeping what it cannot take yet
    fn forward_input(&mut self, n: usize) {
        let master = self.ends[Route::Input as usize].1;
        let written = match write(master.as_raw_fd(), &self.buf[..n]) {
            Ok(written) => written,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => 0,
            Err(err) => {
                tracing::trace!(%err, bytes = n, "stdin write failed, dropped");
                return;
            },
        };
        if written < n {
            tracing::trace!(read = n, written, "stdio master full, holding stdin");
            self.pending.extend_from_slice(&self.buf[written..n]);
        }
    }

    /// Write as much pending stdin as the stdio master accepts
    fn flush(&mut self) {
        let master = self.ends[Route::Input as usize].1;
        match write(master.as_raw_fd(), &self.pending) {
            Ok(written) => {
                self.pending.drain(..written);
            },
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => {},
            Err(err) => {
                tracing::trace!(%err, bytes = self.pending.len(), "stdin write failed, dropped");
                self.pending.clear();
            },
        }
    }

    fn on_empty_read(&mut self, route: Route) -> Transfer {
        // EOF on a pipe or file is final; a terminal can deliver more after ^D
        if route == Route::Input && !self.input_is_terminal {
            return self.close(route);
        }
        Transfer::Idle
    }

    fn close(&mut self, route: Route) -> Transfer {
        tracing::debug!(?route, "source closed, dropping route");
        self.live[route as usize] = false;
        Transfer::Closed
    }

    /// Leave a hung-up source out of the poll set for one interval
    fn rest(&mut self, route: Route) -> Transfer {
        tracing::trace!(?route, "source hung up, resting");
        self.resting[route as usize] = Some(Instant::now() + self.interval);
        Transfer::Idle
    }

    /// Forward whatever the target left buffered in the masters
    fn drain(&mut self) {
        for _ in 0..MAX_DRAIN_PASSES {
            let mut moved = 0;
            for route in [Route::Output, Route::Error] {
                if !self.live[route as usize] || !self.readable_now(route) {
                    continue;
                }
                if let Transfer::Moved(n) = self.pump(route) {
                    moved += n;
                }
            }
            if moved == 0 {
                break;
            }
        }
    }

    fn readable_now(&self, route: Route) -> bool {
        let source = self.ends[route as usize].0;
        let mut fds = [PollFd::new(&source, PollFlags::POLLIN)];
        matches!(poll(&mut fds, 0), Ok(n) if n > 0)
            && fds[0]
                .revents()
                .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
    }
}
