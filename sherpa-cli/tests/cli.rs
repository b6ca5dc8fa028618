// End-to-end CLI flows against a temporary workspace. The default config
// uses the offline hash embedder, so no network is involved.

use assert_cmd::Command;
use predicates::prelude::*;

fn sherpa() -> Command {
    Command::cargo_bin("sherpa").unwrap()
}

#[test]
fn init_then_status() {
    let dir = tempfile::tempdir().unwrap();

    sherpa()
        .arg("init")
        .arg("--path")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized Sherpa"));

    sherpa()
        .arg("status")
        .arg("--path")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("nodes:"));
}

#[test]
fn status_without_init_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    sherpa()
        .arg("status")
        .arg("--path")
        .arg(dir.path())
        .assert()
        .failure()
        .code(3);
}

#[test]
fn add_node_then_score_finds_it() {
    let dir = tempfile::tempdir().unwrap();
    sherpa().arg("init").arg("--path").arg(dir.path()).assert().success();

    sherpa()
        .args([
            "graph",
            "add-node",
            "payments",
            "--kind",
            "capability",
            "--description",
            "validate and charge payments",
        ])
        .arg("--path")
        .arg(dir.path())
        .assert()
        .success();

    sherpa()
        .args(["score", "charge a payment"])
        .arg("--path")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("payments"));
}

#[test]
fn anonymize_reports_zero_on_empty() {
    let dir = tempfile::tempdir().unwrap();
    sherpa().arg("init").arg("--path").arg(dir.path()).assert().success();

    sherpa()
        .args(["trace", "anonymize", "nobody"])
        .arg("--path")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Redacted 0"));
}
