//! CLI and configuration integration tests.

use std::ffi::OsString;
use std::io::Write;

use taskrun::cli::{parse_args_from, Args};
use taskrun::config::Config;
use taskrun::HideSet;
use tempfile::NamedTempFile;

fn args(list: &[&str]) -> Vec<OsString> {
    std::iter::once("taskrun")
        .chain(list.iter().copied())
        .map(OsString::from)
        .collect()
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_no_args() {
    let parsed = parse_args_from(args(&[])).unwrap();
    assert!(parsed.command.is_empty());
    assert!(!parsed.help);
    assert!(!parsed.version);
    assert!(parsed.config.is_none());
}

#[test]
fn test_cli_help_and_version() {
    assert!(parse_args_from(args(&["--help"])).unwrap().help);
    assert!(parse_args_from(args(&["-h"])).unwrap().help);
    assert!(parse_args_from(args(&["--version"])).unwrap().version);
    assert!(parse_args_from(args(&["-V"])).unwrap().version);
}

#[test]
fn test_cli_run_flags() {
    let parsed = parse_args_from(args(&[
        "--pty",
        "--no-fallback",
        "--hide",
        "err",
        "-e",
        "-w",
        "--dry",
        "--timeout",
        "2.5",
        "--shell",
        "/bin/bash",
        "--no-stdin",
        "make",
        "test",
    ]))
    .unwrap();

    assert!(parsed.pty);
    assert!(parsed.no_fallback);
    assert_eq!(parsed.hide, Some(HideSet::STDERR));
    assert!(parsed.echo);
    assert!(parsed.warn);
    assert!(parsed.dry);
    assert_eq!(parsed.timeout, Some(2.5));
    assert_eq!(parsed.shell.as_deref(), Some("/bin/bash"));
    assert!(parsed.no_stdin);
    assert_eq!(parsed.command_line(), "make test");
}

#[test]
fn test_cli_command_keeps_its_own_flags() {
    let parsed = parse_args_from(args(&["-w", "ls", "-la", "--color=never"])).unwrap();
    assert!(parsed.warn);
    assert_eq!(parsed.command, vec!["ls", "-la", "--color=never"]);
}

#[test]
fn test_cli_double_dash() {
    let parsed = parse_args_from(args(&["--", "--weird-name", "arg"])).unwrap();
    assert_eq!(parsed.command_line(), "--weird-name arg");
}

#[test]
fn test_cli_invalid_values() {
    assert!(parse_args_from(args(&["--hide", "sideways", "true"])).is_err());
    assert!(parse_args_from(args(&["--timeout", "soon", "true"])).is_err());
    assert!(parse_args_from(args(&["--timeout", "-1", "true"])).is_err());
    assert!(parse_args_from(args(&["--timeout"])).is_err());
}

#[test]
fn test_cli_unknown_flag() {
    assert!(parse_args_from(args(&["--frobnicate", "true"])).is_err());
}

// ============================================================================
// Config File Tests
// ============================================================================

#[test]
fn test_config_from_file() {
    let file = config_file(
        r#"{
            "run": { "shell": "/bin/bash", "warn": true, "hide": "stdout", "env": { "A": "1" } },
            "timeouts": { "command": 30 },
            "sudo": { "user": "deploy" }
        }"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.run.shell, "/bin/bash");
    assert!(config.run.warn);
    assert_eq!(config.run.hide, HideSet::STDOUT);
    assert_eq!(config.run.env.get("A").map(String::as_str), Some("1"));
    assert_eq!(config.timeouts.command, Some(30.0));
    assert_eq!(config.sudo.user.as_deref(), Some("deploy"));
    // Unset values keep their defaults.
    assert!(config.run.fallback);
    assert_eq!(config.sudo.prompt, "[sudo] password: ");
}

#[test]
fn test_config_file_errors() {
    let file = config_file("{ not json");
    assert!(Config::from_file(file.path()).is_err());
    assert!(Config::from_file(std::path::Path::new("/nonexistent/taskrun.json")).is_err());
}

#[test]
fn test_config_load_rejects_bad_values() {
    let file = config_file(r#"{ "timeouts": { "command": -3 } }"#);
    let parsed = Args {
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };
    assert!(Config::load(&parsed).is_err());
}

// ============================================================================
// Priority Tests
// ============================================================================

#[test]
fn test_args_override_file() {
    let file = config_file(r#"{ "run": { "shell": "/bin/bash", "hide": "both" }, "timeouts": { "command": 30 } }"#);
    let mut config = Config::from_file(file.path()).unwrap();

    let parsed = parse_args_from(args(&["--shell", "/bin/sh", "--hide", "none", "-t", "5", "true"])).unwrap();
    config.apply_args(&parsed);

    assert_eq!(config.run.shell, "/bin/sh");
    assert_eq!(config.run.hide, HideSet::NONE);
    assert_eq!(config.timeouts.command, Some(5.0));
}

#[test]
fn test_env_overrides_file_and_args_override_env() {
    let file = config_file(r#"{ "run": { "warn": false, "echo": false } }"#);
    let mut config = Config::from_file(file.path()).unwrap();

    config.apply_vars(|key| match key {
        "TASKRUN_WARN" => Some("yes".to_string()),
        "TASKRUN_SHELL" => Some("/bin/dash".to_string()),
        _ => None,
    });
    assert!(config.run.warn);
    assert_eq!(config.run.shell, "/bin/dash");

    let parsed = parse_args_from(args(&["--shell", "/bin/sh", "-e", "true"])).unwrap();
    config.apply_args(&parsed);
    assert_eq!(config.run.shell, "/bin/sh");
    assert!(config.run.echo);
    assert!(config.run.warn);
}

#[test]
fn test_absent_args_change_nothing() {
    let mut config = Config::default();
    config.run.warn = true;
    config.timeouts.command = Some(12.0);

    config.apply_args(&parse_args_from(args(&["true"])).unwrap());
    assert!(config.run.warn);
    assert_eq!(config.timeouts.command, Some(12.0));
    assert_eq!(config.run, {
        let mut expected = Config::default().run;
        expected.warn = true;
        expected
    });
}
