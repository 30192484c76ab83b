//! In-process runs of the orchestrator against the fake CLIs.

use crate::common::{FakeTools, HealthServer, assert_contains, assert_ordered};
use e2e_common::{ImageTarget, RunId, RunnerConfig, TargetDescriptor};
use e2e_runner::{EventBus, LifecycleState, Orchestrator, SetupError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn orchestrator(tools: &FakeTools, endpoint: &str, fail: Option<&str>, timeout: Duration) -> Orchestrator {
    let (terraform, docker) = tools.bound(endpoint, fail);
    let (mut config, _) = RunnerConfig::load(Some(&tools.config)).expect("Failed to load config");
    config.terraform.binary = terraform.to_string_lossy().into_owned();
    config.docker.binary = docker.to_string_lossy().into_owned();
    Orchestrator::from_config(&config, "lib-proj", timeout, EventBus::default())
        .expect("Failed to build orchestrator")
}

fn cloud_run(image: &str) -> TargetDescriptor {
    TargetDescriptor::ServerlessContainer(ImageTarget {
        image: image.to_string(),
    })
}

#[tokio::test]
async fn test_setup_then_cleanup_against_cli_backends() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 200 OK");
    let orchestrator = orchestrator(&tools, &server.endpoint(), None, Duration::from_secs(10));
    let run_id = RunId::parse("lib-1").unwrap();

    let outcome = orchestrator
        .setup(&CancellationToken::new(), &cloud_run("img:1"), &run_id)
        .await;

    let client = outcome.result.expect("setup should succeed");
    assert_eq!(client.endpoint(), server.endpoint());
    assert_eq!(client.channel("request_topic"), Some("req-lib-1"));
    assert_eq!(outcome.lifecycle.state(), LifecycleState::Ready);
    assert!(!tools.calls().iter().any(|l| l.contains("destroy")));

    let report = outcome.cleanup.run().await;
    assert!(report.is_clean(), "{report:?}");
    assert!(client.is_closed());
    assert_eq!(outcome.lifecycle.state(), LifecycleState::Done);

    let calls = tools.calls();
    assert_ordered(&calls, "output -json", "destroy -input=false");
    assert_ordered(&calls, "destroy -input=false", "workspace delete");
    let destroy = calls.iter().find(|l| l.contains("destroy -input=false")).unwrap();
    assert_contains(destroy, "tf lib-1 ");
    assert_contains(destroy, "/cloud-run");

    let again = outcome.cleanup.run().await;
    assert!(again.already_ran);
    assert_eq!(
        tools.calls().iter().filter(|l| l.contains("destroy -input=false")).count(),
        1
    );
}

#[tokio::test]
async fn test_concurrent_runs_use_separate_workspaces() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 200 OK");
    let orchestrator = orchestrator(&tools, &server.endpoint(), None, Duration::from_secs(10));
    let cancel = CancellationToken::new();
    let target = TargetDescriptor::ManagedCluster(ImageTarget {
        image: "img:2".to_string(),
    });
    let (a, b) = (RunId::parse("lib-a").unwrap(), RunId::parse("lib-b").unwrap());

    let (first, second) = tokio::join!(
        orchestrator.setup(&cancel, &target, &a),
        orchestrator.setup(&cancel, &target, &b),
    );
    let client_a = first.result.expect("run a should succeed");
    let client_b = second.result.expect("run b should succeed");
    assert_eq!(client_a.channel("request_topic"), Some("req-lib-a"));
    assert_eq!(client_b.channel("request_topic"), Some("req-lib-b"));

    assert!(first.cleanup.run().await.is_clean());
    let calls = tools.calls();
    assert!(calls.iter().any(|l| l.starts_with("tf lib-a ") && l.contains("destroy")));
    assert!(!calls.iter().any(|l| l.starts_with("tf lib-b ") && l.contains("destroy")));

    assert!(second.cleanup.run().await.is_clean());
    assert!(tools.calls().iter().any(|l| l.starts_with("tf lib-b ") && l.contains("destroy")));
}

#[tokio::test]
async fn test_unhealthy_server_times_out_and_destroys() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 503 Service Unavailable");
    let orchestrator = orchestrator(&tools, &server.endpoint(), None, Duration::from_millis(400));
    let run_id = RunId::parse("lib-slow").unwrap();

    let outcome = orchestrator
        .setup(&CancellationToken::new(), &cloud_run("img:3"), &run_id)
        .await;

    assert!(matches!(outcome.result, Err(SetupError::HealthCheckTimeout(_))));
    assert!(outcome.cleanup.run().await.is_clean());
    assert!(tools.calls().iter().any(|l| l.contains("destroy -input=false")));
}

#[tokio::test]
async fn test_cancel_during_health_check_still_destroys() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 503 Service Unavailable");
    let orchestrator = orchestrator(&tools, &server.endpoint(), None, Duration::from_secs(60));
    let run_id = RunId::parse("lib-cancel").unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let outcome = orchestrator.setup(&cancel, &cloud_run("img:4"), &run_id).await;

    assert!(outcome.result.as_ref().is_err_and(SetupError::is_canceled));
    assert!(outcome.cleanup.run().await.is_clean());
    assert!(tools.calls().iter().any(|l| l.contains("destroy -input=false")));
}

#[tokio::test]
async fn test_failed_destroy_is_reported() {
    let tools = FakeTools::new();
    let server = HealthServer::start("HTTP/1.1 200 OK");
    let orchestrator =
        orchestrator(&tools, &server.endpoint(), Some("destroy"), Duration::from_secs(10));
    let run_id = RunId::parse("lib-leak").unwrap();

    let outcome = orchestrator
        .setup(&CancellationToken::new(), &cloud_run("img:5"), &run_id)
        .await;
    assert!(outcome.result.is_ok());

    let report = outcome.cleanup.run().await;
    assert_eq!(report.failures.len(), 1);
    assert_contains(&report.failures[0].message, "lib-leak");
    assert_eq!(outcome.lifecycle.state(), LifecycleState::Done);
}
