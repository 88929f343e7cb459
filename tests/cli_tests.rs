//! # CLI Tests / 命令行测试
//!
//! End-to-end invocations of the `module-runner` binary against small
//! manifest files.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn write_manifest(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn help_lists_the_subcommands() {
    let mut cmd = Command::cargo_bin("module-runner").unwrap();
    cmd.arg("--lang").arg("en").arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("options"));
}

#[test]
fn missing_manifest_is_an_error() {
    let mut cmd = Command::cargo_bin("module-runner").unwrap();
    cmd.arg("run")
        .arg("--lang")
        .arg("en")
        .arg("--manifest")
        .arg("/definitely/not/here.json");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("here.json"));
}

#[test]
fn empty_manifest_exits_with_the_zero_tests_code() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir, "empty.json", r#"{"groups": []}"#);

    let mut cmd = Command::cargo_bin("module-runner").unwrap();
    cmd.arg("run")
        .arg("--lang")
        .arg("en")
        .arg("--manifest")
        .arg(&manifest);
    cmd.assert()
        .code(8)
        .stdout(predicate::str::contains("Zero tests ran"));
}

#[test]
fn legacy_module_rejects_the_whole_run_before_launch() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(
        &dir,
        "legacy.json",
        r#"{"groups": [
            {"modules": [{"runCommand": "sh", "runArguments": "-c true"}]},
            {"modules": [{"runCommand": "ancient-runner", "sessionProtocol": false}]}
        ]}"#,
    );

    let mut cmd = Command::cargo_bin("module-runner").unwrap();
    cmd.arg("run")
        .arg("--lang")
        .arg("en")
        .arg("--manifest")
        .arg(&manifest);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("ancient-runner"));
}

#[test]
fn module_that_never_speaks_the_protocol_fails_the_run() {
    let dir = TempDir::new().unwrap();
    // The module exits 0 but never connects: a handshake failure, so the
    // run cannot be green.
    let manifest = write_manifest(
        &dir,
        "silent.json",
        r#"{"groups": [{"modules": [
            {"runCommand": "sh", "runArguments": "-c true", "targetPath": "/m/silent.dll"}
        ]}]}"#,
    );

    let mut cmd = Command::cargo_bin("module-runner").unwrap();
    cmd.arg("run")
        .arg("--lang")
        .arg("en")
        .arg("--no-progress")
        .arg("--manifest")
        .arg(&manifest);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Zero tests ran"));
}

#[test]
fn config_file_language_is_honored() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir, "empty.json", r#"{"groups": []}"#);
    let config = dir.path().join("ModuleRunner.toml");
    fs::write(&config, "language = \"zh-CN\"\n").unwrap();

    let mut cmd = Command::cargo_bin("module-runner").unwrap();
    cmd.arg("run")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--config")
        .arg(&config);
    cmd.assert()
        .code(8)
        .stdout(predicate::str::contains("没有运行任何测试"));
}
