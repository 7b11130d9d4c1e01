mod cli;
mod config;
mod coordinator;
mod shutdown;

use std::sync::Arc;

use bollard::Docker;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use executor_core::JobId;
use executor_driver::{DriverOutcome, JobDriver, SecurityGate};
use executor_runner::DockerJobRunner;

use crate::cli::Cli;
use crate::config::ExecutorConfig;
use crate::coordinator::WsCoordinatorClient;
use crate::shutdown::{ShutdownController, ShutdownEvent, spawn_ctrl_c_handler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ExecutorConfig::from(Cli::parse());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let job_uuid = JobId(config.job_uuid);
    tracing::info!(%job_uuid, coordinator_url = %config.coordinator_url, "executor starting");

    let coordinator = WsCoordinatorClient::connect(&config.coordinator_url, job_uuid).await?;
    let runner = DockerJobRunner::new(config.runner)?;
    let docker = Docker::connect_with_local_defaults()?;
    let gate = SecurityGate::new(docker, config.security_gate);

    let driver = JobDriver::new(runner, coordinator, gate, config.startup_time_limit, config.debug_no_gpu_mode);
    let mut execution = tokio::spawn(driver.execute());

    let outcome = loop {
        tokio::select! {
            result = &mut execution => break result.unwrap_or(DriverOutcome::HordeFailed),
            ev = shutdown_rx.recv() => match ev {
                Some(ShutdownEvent::Graceful) => {
                    tracing::info!("shutdown requested; letting the job run to its own deadline");
                }
                Some(ShutdownEvent::Immediate) | None => {
                    tracing::warn!("shutdown requested again, exiting without waiting for cleanup");
                    std::process::exit(130);
                }
            },
        }
    };

    match outcome {
        DriverOutcome::Success => {
            tracing::info!(%job_uuid, "job completed successfully");
            Ok(())
        }
        DriverOutcome::JobFailed => {
            tracing::warn!(%job_uuid, "job failed");
            std::process::exit(1);
        }
        DriverOutcome::HordeFailed => {
            tracing::error!(%job_uuid, "job failed at the infrastructure level");
            std::process::exit(2);
        }
    }
}
