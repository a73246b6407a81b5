//! faketty: run a program as if it were attached to an interactive terminal
//!
//! The program's stdin/stdout share one pseudoterminal and its stderr gets a
//! second one, so it sees three terminal devices even when faketty itself is
//! driven by pipes or files. A single-threaded relay moves bytes between
//! faketty's real standard streams and the PTY masters until the program
//! exits, then returns its exit code.
//!
//! - `pty`: PTY pair allocation
//! - `session`: the fork into relay and target roles, the target's terminal
//!   setup and the relay loop
//! - `cli`: argument classification and help texts
//! - `config`: relay tunables

pub mod cli;
pub mod config;
pub mod pty;
pub mod session;

pub use config::RelayConfig;
pub use session::{launch, ExitStatus};
