//! Relay configuration

use std::time::Duration;

/// How long the relay waits for readiness before re-checking the target
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bytes moved per read, per source, per iteration
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables of the I/O relay loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upper bound on the readiness wait; also the exit-detection latency
    pub poll_interval: Duration,
    /// Size of the relay's read buffer
    pub buffer_size: usize,
    /// Copy the invoker's terminal size onto both PTY pairs
    pub inherit_window_size: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            inherit_window_size: true,
        }
    }
}

impl RelayConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_window_size_inheritance(mut self, inherit: bool) -> Self {
        self.inherit_window_size = inherit;
        self
    }

    /// Clamp values so the loop always makes progress and exit detection
    /// stays bounded
    pub fn validated(&self) -> Self {
        Self {
            poll_interval: self.poll_interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL),
            buffer_size: self.buffer_size.max(1),
            inherit_window_size: self.inherit_window_size,
        }
    }

    /// Poll interval as the millisecond timeout poll(2) expects
    pub fn poll_timeout_ms(&self) -> i32 {
        let millis = self
            .poll_interval
            .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
            .as_millis();
        i32::try_from(millis).unwrap_or(i32::MAX)
    }
}
