//! End-to-end runs of the binary against fake terraform and docker.

use crate::common::assertions::assert_ordered;
use crate::common::{FakeTools, HealthServer, assert_contains, describe};

#[test]
fn test_cloud_run_passes_and_destroys_workspace() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 200 OK");

    let output = tools
        .runner(&server.endpoint())
        .args(["--test-run-id", "itest-ok", "cloud-run", "--image", "gcr.io/p/server:1"])
        .args(["--", "sh", "-c"])
        .arg(format!(
            "test \"$TEST_SERVER_ENDPOINT\" = \"{}\" && test \"$TEST_SERVER_REQUEST_TOPIC\" = req-itest-ok && test \"$TEST_RUN_ID\" = itest-ok",
            server.endpoint()
        ))
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(0), "{}", describe(&output));
    let calls = tools.calls();
    assert_ordered(&calls, "workspace new -no-color itest-ok", "apply -input=false");
    assert_ordered(&calls, "apply -input=false", "output -json");
    assert_ordered(&calls, "output -json", "destroy -input=false");
    assert_ordered(&calls, "destroy -input=false", "workspace delete -no-color itest-ok");
    let apply = calls.iter().find(|l| l.contains("apply -input=false")).unwrap();
    assert_contains(apply, "tf itest-ok ");
    assert_contains(apply, "-var image=gcr.io/p/server:1");
    assert_contains(apply, "-var project_id=itest-proj");
    assert_contains(apply, "-var test_run_id=itest-ok");
}

#[test]
fn test_failing_tests_exit_1_and_still_clean_up() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 200 OK");

    let output = tools
        .runner(&server.endpoint())
        .args(["--test-run-id", "itest-fail", "gke", "--image", "img"])
        .args(["--", "sh", "-c", "exit 7"])
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    assert!(tools.calls().iter().any(|l| l.contains("destroy -input=false")));
}

#[test]
fn test_failed_apply_still_destroys() {
    let tools = FakeTools::new();

    let output = tools
        .runner("http://127.0.0.1:9")
        .env("FAKE_TF_FAIL", "apply -input=false")
        .args(["--test-run-id", "itest-apply", "gke", "--image", "img"])
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "injected failure");
    let calls = tools.calls();
    assert_ordered(&calls, "apply -input=false", "destroy -input=false");
    assert!(!calls.iter().any(|l| l.contains("output -json")));
}

#[test]
fn test_unhealthy_server_times_out_and_cleans_up() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 503 Service Unavailable");

    let output = tools
        .runner(&server.endpoint())
        .args(["--health-check-timeout", "1s", "--test-run-id", "itest-slow"])
        .args(["cloud-run", "--image", "img", "--", "true"])
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "never became healthy");
    assert!(tools.calls().iter().any(|l| l.contains("destroy -input=false")));
}

#[test]
fn test_cleanup_failure_after_success_exits_3() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 200 OK");

    let output = tools
        .runner(&server.endpoint())
        .env("FAKE_TF_FAIL", "destroy")
        .args(["--test-run-id", "itest-leak", "gke", "--image", "img", "--", "true"])
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(3), "{}", describe(&output));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "cleanup action(s) failed");
}

#[test]
fn test_local_removes_container_before_destroying_channels() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 200 OK");
    let port = server.port.to_string();

    let output = tools
        .runner("unused")
        .args(["--test-run-id", "itest-local", "local", "--image", "server:dev"])
        .args(["--port", port.as_str(), "--container-user", "1000"])
        .args(["--", "sh", "-c", "test \"$TEST_SERVER_REQUEST_TOPIC\" = req-itest-local"])
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(0), "{}", describe(&output));
    let calls = tools.calls();
    let run = calls.iter().find(|l| l.starts_with("docker run")).unwrap();
    assert_contains(run, "--name e2e-itest-local");
    assert_contains(run, &format!("--publish {port}:{port}"));
    assert_contains(run, "--user 1000");
    assert_contains(run, "REQUEST_TOPIC=req-itest-local");
    assert_ordered(&calls, "tf itest-local", "docker run");
    assert_ordered(&calls, "docker run", "docker rm --force e2e-itest-local");
    assert_ordered(&calls, "docker rm --force", "destroy -input=false");
    assert_eq!(calls.iter().filter(|l| l.starts_with("docker rm")).count(), 1);
}

#[test]
fn test_without_test_command_only_verifies_deployment() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 204 No Content");

    let output = tools
        .runner(&server.endpoint())
        .args(["cloud-run", "--image", "img"])
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(0), "{}", describe(&output));
    let calls = tools.calls();
    let apply = calls.iter().find(|l| l.contains("apply -input=false")).unwrap();
    let workspace = apply.split_whitespace().nth(1).unwrap();
    assert_eq!(workspace.len(), e2e_common::run_id::GENERATED_RUN_ID_LEN);
}

#[test]
fn test_malformed_run_id_is_usage_error() {
    let tools = FakeTools::new();

    let output = tools
        .runner("http://127.0.0.1:9")
        .args(["--test-run-id", "Bad_ID", "gke", "--image", "img"])
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(2), "{}", describe(&output));
    assert!(tools.calls().is_empty());
}

#[test]
fn test_apply_persistent_uses_default_workspace() {
    let tools = FakeTools::new();

    let output = tools
        .runner("unused")
        .args(["apply-persistent", "--auto-approve"])
        .output()
        .expect("Failed to run e2e-runner");

    assert_eq!(output.status.code(), Some(0), "{}", describe(&output));
    let calls = tools.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|l| l.starts_with("tf default ")));
    assert_contains(&calls[1], "apply -input=true -var project_id=itest-proj -auto-approve");
}
