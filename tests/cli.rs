#![cfg(unix)]

use assert_cmd::Command as AssertCommand;
use inference_warden::commands::Cli;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use predicates::prelude::*;
use std::process::Stdio;
use std::time::Duration;

fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
    let argv: Vec<String> = std::iter::once("inference-warden")
        .chain(args.iter().copied())
        .map(|s| s.to_string())
        .collect();
    Cli::try_parse_args_from(argv)
}

#[test]
fn parses_positional_arguments_with_defaults() {
    let cli = parse(&["run-worker --gpu 0", "3"]).expect("valid arguments");
    assert_eq!(cli.command, "run-worker --gpu 0");
    assert_eq!(cli.instances, 3);
    assert!(!cli.silent);
    assert_eq!(cli.no_inference_timeout, 60);

    let config = cli.to_config();
    assert_eq!(config.instances, 3);
    assert_eq!(config.stall_timeout, Duration::from_secs(3600));
    assert_eq!(config.fleet_restart_interval, Some(Duration::from_secs(300)));
    assert_eq!(config.stagger, Duration::from_secs(1));
}

#[test]
fn parses_optional_flags() {
    let cli = parse(&[
        "run-worker",
        "2",
        "--silent",
        "--no-inference-timeout",
        "15",
        "--fleet-restart-minutes",
        "0",
        "--stagger-ms",
        "250",
    ])
    .expect("valid arguments");

    let config = cli.to_config();
    assert!(config.silent);
    assert_eq!(config.stall_timeout, Duration::from_secs(15 * 60));
    assert_eq!(config.fleet_restart_interval, None);
    assert_eq!(config.stagger, Duration::from_millis(250));
}

#[test]
fn huge_stall_timeout_saturates_instead_of_overflowing() {
    let cli = parse(&[
        "run-worker",
        "1",
        "--no-inference-timeout",
        "18446744073709551615",
    ])
    .expect("valid arguments");

    let config = cli.to_config();
    assert_eq!(config.stall_timeout, Duration::from_secs(u64::MAX));
    assert!(config.validate().is_ok());
}

#[test]
fn shell_flag_overrides_default_interpreter() {
    let config = parse(&["run-worker", "1"]).expect("valid arguments").to_config();
    assert_eq!(config.shell, "sh");

    let config = parse(&["run-worker", "1", "--shell", "bash"])
        .expect("valid arguments")
        .to_config();
    assert_eq!(config.shell, "bash");
}

#[test]
fn rejects_non_positive_values() {
    assert!(parse(&["run-worker", "0"]).is_err());
    assert!(parse(&["run-worker", "-2"]).is_err());
    assert!(parse(&["run-worker", "2", "--no-inference-timeout", "0"]).is_err());
    assert!(parse(&["run-worker"]).is_err());
}

#[test]
fn help_lists_the_cli_surface() {
    AssertCommand::cargo_bin("inference-warden")
        .expect("binary built")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("INSTANCES"))
        .stdout(predicate::str::contains("--no-inference-timeout"))
        .stdout(predicate::str::contains("--silent"));
}

#[test]
fn zero_instances_exit_with_usage_error() {
    AssertCommand::cargo_bin("inference-warden")
        .expect("binary built")
        .args(["echo hi", "0"])
        .assert()
        .failure();
}

#[test]
fn interrupt_drains_workers_and_exits_cleanly() {
    let binary = assert_cmd::cargo::cargo_bin("inference-warden");
    let child = std::process::Command::new(binary)
        .args(["echo hello; sleep 600", "2", "--stagger-ms", "100"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn supervisor");

    std::thread::sleep(Duration::from_millis(1500));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).expect("send SIGINT");

    let output = child.wait_with_output().expect("supervisor exits");
    assert!(output.status.success(), "exit status {:?}", output.status);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Worker 0: hello"), "stdout: {stdout}");
    assert!(stdout.contains("Worker 1: hello"), "stdout: {stdout}");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("All workers have finished"), "stderr: {stderr}");
}
