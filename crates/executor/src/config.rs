//! Typed configuration assembled from [`crate::cli::Cli`] — the seam between
//! the environment/flags surface and the collaborators `main` wires together.

use executor_driver::SecurityGateConfig;
use executor_runner::DockerRunnerConfig;

use crate::cli::Cli;

pub struct ExecutorConfig {
    pub coordinator_url: String,
    pub job_uuid: uuid::Uuid,
    pub startup_time_limit: f64,
    pub debug_no_gpu_mode: bool,
    pub runner: DockerRunnerConfig,
    pub security_gate: SecurityGateConfig,
    pub log: String,
}

impl From<Cli> for ExecutorConfig {
    fn from(cli: Cli) -> Self {
        let mut security_gate = SecurityGateConfig::default();
        if let Some(version) = cli.nvidia_toolkit_min_version {
            security_gate.nvidia_toolkit_minimum_version = version;
        }

        Self {
            coordinator_url: cli.coordinator_url,
            job_uuid: cli.job_uuid,
            startup_time_limit: cli.startup_time_limit,
            debug_no_gpu_mode: cli.debug_no_gpu_mode,
            runner: DockerRunnerConfig {
                max_artifact_file_bytes: cli.max_artifact_file_bytes,
                max_volume_size_bytes: cli.volume_max_size_bytes,
                upload_max_attempts: cli.upload_max_attempts,
                debug_no_gpu_mode: cli.debug_no_gpu_mode,
            },
            security_gate,
            log: cli.log,
        }
    }
}
