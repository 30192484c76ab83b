use std::process::Command;

use crate::common::{assert_contains, init};

fn runner() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_e2e-runner"));
    cmd.env_remove("PROJECT_ID").env_remove("TEST_RUN_ID");
    cmd
}

#[test]
fn test_help_lists_every_target() {
    init();
    let output = runner().arg("--help").output().expect("Failed to run --help");

    assert!(output.status.success(), "--help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "run the tests and tear everything down");
    for sub in [
        "apply-persistent",
        "local",
        "gke",
        "gce",
        "gae",
        "gae-standard",
        "cloud-run",
        "cloud-functions-gen2",
    ] {
        assert_contains(&stdout, sub);
    }
    assert_contains(&stdout, "--health-check-timeout");
}

#[test]
fn test_version_matches_package() {
    init();
    let output = runner().arg("--version").output().expect("Failed to run --version");

    assert!(output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stdout), env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_missing_project_id_is_usage_error() {
    init();
    let output = runner()
        .args(["gke", "--image", "gcr.io/p/server:1"])
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(2));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "--project-id");
}

#[test]
fn test_local_help_shows_container_flags() {
    init();
    let output = runner()
        .args(["local", "--help"])
        .output()
        .expect("Failed to run local --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--image", "--port", "--network", "--container-user", "--google-application-credentials"] {
        assert_contains(&stdout, flag);
    }
}
