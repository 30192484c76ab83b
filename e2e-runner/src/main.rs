//! e2e-runner: deploy the instrumented test server, run the tests, tear down.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use e2e_common::{EnvParser, LogConfig, RunId, RunnerConfig, init_logging, resolve_run_id};
use e2e_runner::cli::{
    Cli, Commands, EXIT_CANCELED, EXIT_FAILURE, EXIT_OK, EXIT_USAGE, exit_code,
};
use e2e_runner::harness::{HarnessOutcome, TestHarness};
use e2e_runner::persistent::apply_persistent;
use e2e_runner::{EventBus, Orchestrator, TerraformCli};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let code = run(cli).await?;
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let (mut config, source) = RunnerConfig::load(cli.config.as_deref())?;
    debug!("Runner config loaded from {:?}", source);
    for err in config.apply_env(&mut EnvParser::new()) {
        warn!("Ignoring environment override: {}", err);
    }
    if let Some(root) = &cli.tf_root {
        config.terraform.root = root.clone();
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; canceling run and cleaning up");
                cancel.cancel();
            }
        });
    }

    let Some((descriptor, test_command)) = cli.command.deployment() else {
        let Commands::ApplyPersistent { auto_approve } = &cli.command else {
            return Ok(EXIT_USAGE);
        };
        let terraform = TerraformCli::new(config.terraform.binary.clone());
        return match apply_persistent(
            &cancel,
            &terraform,
            &config.terraform.root,
            &cli.project_id,
            *auto_approve,
        )
        .await
        {
            Ok(()) => Ok(EXIT_OK),
            Err(_) if cancel.is_cancelled() => Ok(EXIT_CANCELED),
            Err(err) => {
                error!("{:#}", err);
                Ok(EXIT_FAILURE)
            }
        };
    };

    if let Some(value) = cli.test_run_id.as_deref().filter(|v| !v.is_empty())
        && let Err(err) = RunId::parse(value)
    {
        error!("{}", err);
        return Ok(EXIT_USAGE);
    }
    let run_id = resolve_run_id(cli.test_run_id.as_deref());
    info!(run_id = %run_id, target = %descriptor.kind(), "Starting e2e run");

    let harness = if test_command.is_empty() {
        None
    } else {
        Some(TestHarness::new(test_command)?)
    };

    let events = EventBus::default();
    {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                debug!(target: "e2e_runner::events", "{}", event);
            }
        });
    }

    let health_timeout = cli
        .health_check_timeout
        .unwrap_or_else(|| config.health.timeout());
    let orchestrator = Orchestrator::from_config(&config, &cli.project_id, health_timeout, events)?;
    let run = orchestrator
        .run_scoped(&cancel, &descriptor, &run_id, move |client, cancel| async move {
            match harness {
                Some(harness) => harness.run(&cancel, &client).await,
                None => {
                    info!(endpoint = %client.endpoint(), "No test command given; deployment verified");
                    Ok(HarnessOutcome::Passed)
                }
            }
        })
        .await;

    match &run.result {
        Err(err) if err.is_canceled() => warn!("{}", err),
        Err(err) => error!("{}", err),
        Ok(Err(err)) => error!("{:#}", err),
        Ok(Ok(_)) => {}
    }
    if let Err(err) = run.cleanup.clone().into_result() {
        error!(run_id = %run_id, "{}", err);
    }

    let code = exit_code(&run.result, &run.cleanup);
    info!(run_id = %run_id, exit_code = code, "Run finished");
    Ok(code)
}
