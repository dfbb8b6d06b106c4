//! CLI integration tests
//!
//! Runs the qflowctl binary against throwaway archive directories.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

/// qflowctl with a private HOME so no user config file is read
fn qflowctl(home: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_qflowctl"));
    command
        .env("HOME", home)
        .env_remove("QFLOW_ROOT")
        .env("RUST_LOG", "warn");
    command
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    let output = qflowctl(home.path()).arg("--help").output().unwrap();

    assert!(output.status.success());
    let help = stdout(&output);
    for command in ["query", "cat", "replay", "first-timestamp", "inspect"] {
        assert!(help.contains(command), "help should list '{}'", command);
    }
}

#[test]
fn test_invalid_subcommand_fails() {
    let home = TempDir::new().unwrap();
    let output = qflowctl(home.path()).arg("nonexistent-command").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_inspect_text() {
    let home = TempDir::new().unwrap();
    let output = qflowctl(home.path())
        .args([
            "--format",
            "text",
            "inspect",
            "/data/flow/m-1/20171220/orders.default.20171220-000000Z.gz",
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("machine:    m-1"));
    assert!(text.contains("topic:      orders"));
    assert!(text.contains("compressed: true"));
}

#[test]
fn test_inspect_rejects_foreign_path() {
    let home = TempDir::new().unwrap();
    let output = qflowctl(home.path())
        .args(["inspect", "/etc/passwd"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_query_empty_archive() {
    let home = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let output = qflowctl(home.path())
        .env("QFLOW_ROOT", root.path())
        .args(["query", "--date", "20171220"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(stdout(&output).is_empty());
}

#[test]
fn test_query_rejects_bad_date() {
    let home = TempDir::new().unwrap();
    let output = qflowctl(home.path())
        .args(["query", "--date", "2017-12-20"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_first_timestamp_of_empty_file() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("a.default.20171220-000000Z");
    std::fs::write(&file, b"").unwrap();

    let output = qflowctl(home.path())
        .arg("first-timestamp")
        .arg(&file)
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(stdout(&output).contains("unreadable"));
}

#[test]
fn test_config_file_sets_root() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join(".qflow");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[archive]\nroot_dir = \"\"\n",
    )
    .unwrap();

    // An empty root from the file fails validation
    let output = qflowctl(home.path())
        .args(["query", "--date", "20171220"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    // The flag overrides the file
    let root = TempDir::new().unwrap();
    let output = qflowctl(home.path())
        .arg("--root")
        .arg(root.path())
        .args(["query", "--date", "20171220"])
        .output()
        .unwrap();
    assert!(output.status.success());
}
