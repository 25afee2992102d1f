// CLI surface checks that need no configuration or database

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_every_command() {
    let mut cmd = Command::cargo_bin("lanekeeper").unwrap();

    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("move"))
        .stdout(predicate::str::contains("board"))
        .stdout(predicate::str::contains("launch"))
        .stdout(predicate::str::contains("advance"))
        .stdout(predicate::str::contains("signal"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_launch_help_describes_budget_and_follow() {
    let mut cmd = Command::cargo_bin("lanekeeper").unwrap();

    cmd.args(["launch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--budget-ms"))
        .stdout(predicate::str::contains("--follow"))
        .stdout(predicate::str::contains("--kind"));
}

#[test]
fn test_missing_subcommand_is_a_usage_error() {
    let mut cmd = Command::cargo_bin("lanekeeper").unwrap();

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
