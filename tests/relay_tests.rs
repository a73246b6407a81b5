//! End-to-end behaviour of the relay: the program sees terminals, the
//! invoker sees the program's bytes and exit code

mod support;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::process::Stdio;
use std::time::Duration;

use proptest::prelude::*;

use support::{faketty, run, run_with_input, wait_within};

#[test]
fn test_printf_scenario() {
    let output = run(&["printf", "a"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, b"a");
}

#[test]
fn test_split_streams_and_exit_code_scenario() {
    let output = run(&["sh", "-c", "echo out; echo err 1>&2; exit 7"]);
    assert_eq!(output.status.code(), Some(7));
    assert_eq!(output.stdout, b"out\n");
    assert_eq!(output.stderr, b"err\n");
}

#[test]
fn test_stderr_never_reaches_stdout() {
    let script = "for i in 1 2 3 4 5; do echo STDOUT-TAG-$i; echo STDERR-TAG-$i >&2; done";
    let output = run(&["sh", "-c", script]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stdout.contains("STDERR-TAG"), "stdout: {stdout}");
    assert!(!stderr.contains("STDOUT-TAG"), "stderr: {stderr}");
    assert_eq!(stdout.matches("STDOUT-TAG").count(), 5);
    assert_eq!(stderr.matches("STDERR-TAG").count(), 5);
}

#[test]
fn test_target_sees_terminals_through_pipes() {
    let script = "test -t 0 && test -t 1 && test -t 2 && echo all-terminals";
    let output = run_with_input(&["sh", "-c", script], b"");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, b"all-terminals\n");
}

#[test]
fn test_target_sees_terminals_through_files() {
    let mut stdout = tempfile::tempfile().expect("Failed to create temp file");
    let stderr = tempfile::tempfile().expect("Failed to create temp file");

    let status = faketty()
        .args(["sh", "-c", "test -t 0 && test -t 1 && test -t 2 && echo all-terminals"])
        .stdin(Stdio::null())
        .stdout(stdout.try_clone().expect("Failed to clone file"))
        .stderr(stderr)
        .status()
        .expect("Failed to run faketty");

    assert_eq!(status.code(), Some(0));
    assert_eq!(read_file(&mut stdout), b"all-terminals\n");
}

#[test]
fn test_target_has_controlling_terminal() {
    // /dev/tty only opens for a process with a controlling terminal
    let output = run(&["sh", "-c", "exec 3</dev/tty && echo has-ctty"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, b"has-ctty\n");
}

#[test]
fn test_target_runs_in_raw_mode() {
    let output = run(&["sh", "-c", "stty -a"]);
    assert_eq!(output.status.code(), Some(0));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("-icanon"), "stty: {text}");
    assert!(text.contains("-echo "), "stty: {text}");
}

#[test]
fn test_signal_death_maps_to_128_plus_signal() {
    let output = run(&["sh", "-c", "kill -TERM $$"]);
    assert_eq!(output.status.code(), Some(128 + 15));
}

#[test]
fn test_arguments_pass_through_untouched() {
    let output = run(&["printf", "%s|", "--help", "two words", ""]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, b"--help|two words||");
}

#[test]
fn test_large_stdin_passes_through() {
    const LEN: usize = 300_000;
    let data: Vec<u8> = (0..LEN).map(|i| b'a' + (i % 26) as u8).collect();

    let mut input = tempfile::tempfile().expect("Failed to create temp file");
    input.write_all(&data).expect("Failed to write input");
    input.seek(SeekFrom::Start(0)).expect("Failed to rewind input");
    let mut stdout = tempfile::tempfile().expect("Failed to create temp file");

    let mut child = faketty()
        .args(["head", "-c", &LEN.to_string()])
        .stdin(input)
        .stdout(stdout.try_clone().expect("Failed to clone file"))
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start faketty");

    let status = wait_within(&mut child, Duration::from_secs(30));
    assert_eq!(status.code(), Some(0));
    let out = read_file(&mut stdout);
    assert_eq!(out.len(), LEN);
    assert!(out == data, "output differs from input");
}

#[test]
fn test_output_through_controlling_terminal_after_closing_stdio() {
    let output = run(&["sh", "-c", "exec 1>&- 0<&-; sleep 0.2; echo hi >/dev/tty"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, b"hi\n");
}

fn read_file(file: &mut File) -> Vec<u8> {
    let mut data = Vec::new();
    file.seek(SeekFrom::Start(0)).expect("Failed to rewind");
    file.read_to_end(&mut data).expect("Failed to read back");
    data
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_stdin_reaches_target_and_stdout_unchanged(
        input in prop::collection::vec(any::<u8>(), 1..512)
    ) {
        let count = input.len().to_string();
        let output = run_with_input(&["head", "-c", &count], &input);
        prop_assert_eq!(output.status.code(), Some(0));
        prop_assert_eq!(output.stdout, input);
    }

    #[test]
    fn prop_exit_code_propagates(code in 0u8..=255) {
        let script = format!("exit {code}");
        let output = run(&["sh", "-c", &script]);
        prop_assert_eq!(output.status.code(), Some(i32::from(code)));
    }
}
