//! Helpers for driving the built faketty binary

#![allow(dead_code)]

use std::io::Write;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// A `faketty` command ready to run
pub fn faketty() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_faketty"));
    command.env_remove("FAKETTY_LOG");
    command
}

/// Run faketty with `args`, feeding `input` on stdin and capturing both
/// output streams through pipes
pub fn run_with_input(args: &[&str], input: &[u8]) -> Output {
    let mut child = faketty()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start faketty");

    let mut stdin = child.stdin.take().expect("stdin is piped");
    stdin.write_all(input).expect("Failed to write faketty stdin");
    drop(stdin);

    child.wait_with_output().expect("Failed to wait for faketty")
}

/// Run faketty with `args` and an empty stdin
pub fn run(args: &[&str]) -> Output {
    faketty()
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("Failed to run faketty")
}

/// Wait for `child`, killing it and failing the test if it takes longer
/// than `limit`
pub fn wait_within(child: &mut Child, limit: Duration) -> ExitStatus {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().expect("Failed to poll faketty") {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("faketty still running after {limit:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}
