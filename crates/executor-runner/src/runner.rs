//! [`DockerJobRunner`]: the production [`JobRunner`] implementation.

use async_trait::async_trait;
use bollard::Docker;
use executor_core::protocol::{
    ExecutionResult, JobResult, MachineSpecs, V0InitialJobRequest, V0JobRequest,
};
use executor_core::{FailureContext, JobError, JobFailureReason, JobRunner};

use crate::container::{self, ContainerSpec};
use crate::{artifacts, specs, upload, volume};

/// Knobs that come from the process's own configuration rather than the
/// coordinator — set once at startup, shared by every job the process runs.
#[derive(Debug, Clone)]
pub struct DockerRunnerConfig {
    /// Hard cap on a single harvested artifact file, in bytes.
    pub max_artifact_file_bytes: u64,
    /// Hard cap on a downloaded input volume, in bytes. Exceeding it fails
    /// the volume-download stage with `JobFailureReason::DownloadFailed`.
    pub max_volume_size_bytes: u64,
    /// How many times an output upload is attempted before giving up.
    pub upload_max_attempts: u32,
    /// Forces `gpu_enabled` to `false` regardless of the docker run options
    /// preset — for running on hosts with no GPU and no NVIDIA Container
    /// Toolkit, e.g. local development.
    pub debug_no_gpu_mode: bool,
}

impl Default for DockerRunnerConfig {
    fn default() -> Self {
        Self {
            max_artifact_file_bytes: 1024 * 1024 * 1024,
            max_volume_size_bytes: 50 * 1024 * 1024 * 1024,
            upload_max_attempts: 3,
            debug_no_gpu_mode: false,
        }
    }
}

pub struct DockerJobRunner {
    docker: Docker,
    http: reqwest::Client,
    config: DockerRunnerConfig,

    workdir: tempfile::TempDir,
    container_name: String,
    container_id: Option<String>,

    initial: Option<V0InitialJobRequest>,
    full: Option<V0JobRequest>,
    execution_result: Option<ExecutionResult>,
    certificate: Option<String>,
}

impl DockerJobRunner {
    pub fn new(config: DockerRunnerConfig) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        let workdir = tempfile::tempdir()?;
        Ok(Self {
            docker,
            http: reqwest::Client::new(),
            config,
            container_name: format!("horde-job-{}", uuid::Uuid::new_v4()),
            container_id: None,
            workdir,
            initial: None,
            full: None,
            execution_result: None,
            certificate: None,
        })
    }

    fn volume_dir(&self) -> std::path::PathBuf {
        self.workdir.path().join("volume")
    }

    /// Absolute in-container path the job's artifacts are harvested from.
    /// `V0JobRequest.artifacts_dir` is an absolute container path (e.g.
    /// `/artifacts`), not a path relative to `/workspace`, so it needs its
    /// own bind mount rather than being joined onto `volume_dir()` — joining
    /// a `PathBuf` with an absolute path silently discards the base.
    fn artifacts_container_path(&self) -> String {
        self.full
            .as_ref()
            .and_then(|f| f.artifacts_dir.clone())
            .unwrap_or_else(|| "/workspace".to_string())
    }

    /// Host-side directory bind-mounted at `artifacts_container_path()`.
    /// When the job didn't request a separate artifacts directory this is
    /// just `volume_dir()`, already mounted at `/workspace`.
    fn artifacts_host_dir(&self) -> std::path::PathBuf {
        match self.full.as_ref().and_then(|f| f.artifacts_dir.as_deref()) {
            Some(_) => self.workdir.path().join("artifacts"),
            None => self.volume_dir(),
        }
    }

    fn gpu_enabled(&self) -> bool {
        if self.config.debug_no_gpu_mode {
            return false;
        }
        self.full
            .as_ref()
            .map(|f| f.docker_run_options_preset == "nvidia_all")
            .unwrap_or(false)
    }
}

fn download_failed(message: impl Into<String>) -> JobError {
    JobError::new(message, JobFailureReason::DownloadFailed)
}

#[async_trait]
impl JobRunner for DockerJobRunner {
    async fn capture_machine_specs(&mut self) -> MachineSpecs {
        specs::capture()
    }

    async fn prepare_initial(&mut self, initial: &V0InitialJobRequest) -> Result<(), JobError> {
        self.initial = Some(initial.clone());
        Ok(())
    }

    async fn prepare_full(&mut self, full: &V0JobRequest) -> Result<(), JobError> {
        self.full = Some(full.clone());
        Ok(())
    }

    async fn download_volume(&mut self) -> Result<(), JobError> {
        let full = self
            .full
            .as_ref()
            .ok_or_else(|| download_failed("download_volume called before prepare_full"))?;
        let dest = self.volume_dir();
        std::fs::create_dir_all(&dest).map_err(|err| {
            download_failed(format!("failed to create volume directory: {err}"))
        })?;
        volume::materialize(&full.volume, &dest, &self.http, self.config.max_volume_size_bytes).await
    }

    async fn start_job(&mut self) -> Result<(), JobError> {
        let full = self
            .full
            .as_ref()
            .ok_or_else(|| download_failed("start_job called before prepare_full"))?;

        container::pull_image(&self.docker, &full.docker_image)
            .await
            .map_err(|err| {
                JobError::new(
                    format!("failed to pull docker image {}: {err}", full.docker_image),
                    JobFailureReason::NonzeroReturnCode,
                )
                .with_context(FailureContext::new().with("image", full.docker_image.clone()))
            })?;

        let mut binds = vec![format!("{}:/workspace", self.volume_dir().display())];
        if full.artifacts_dir.is_some() {
            let host_dir = self.artifacts_host_dir();
            std::fs::create_dir_all(&host_dir).map_err(|err| {
                JobError::new(
                    format!("failed to create artifacts directory: {err}"),
                    JobFailureReason::NonzeroReturnCode,
                )
            })?;
            binds.push(format!("{}:{}", host_dir.display(), self.artifacts_container_path()));
        }
        let spec = ContainerSpec {
            name: &self.container_name,
            image: &full.docker_image,
            cmd: full.docker_run_cmd.clone(),
            working_dir: Some("/workspace".to_string()),
            binds,
            gpu_enabled: self.gpu_enabled(),
        };

        let container_id = container::create_and_start(&self.docker, spec)
            .await
            .map_err(|err| {
                JobError::new(
                    format!("failed to start job container: {err}"),
                    JobFailureReason::NonzeroReturnCode,
                )
            })?;
        self.container_id = Some(container_id);
        Ok(())
    }

    async fn await_completion(&mut self) -> Result<(), JobError> {
        let container_id = self.container_id.clone().ok_or_else(|| {
            JobError::new("await_completion called before start_job", JobFailureReason::NonzeroReturnCode)
        })?;

        let status_code = container::wait_for_exit(&self.docker, &container_id)
            .await
            .map_err(|err| {
                JobError::new(
                    format!("failed waiting for container exit: {err}"),
                    JobFailureReason::NonzeroReturnCode,
                )
            })?;
        let (stdout, stderr) = container::collect_logs(&self.docker, &container_id)
            .await
            .unwrap_or_default();
        container::force_remove(&self.docker, &container_id).await;
        self.container_id = None;

        let timed_out = false;
        self.execution_result = Some(ExecutionResult {
            return_code: status_code as i32,
            stdout,
            stderr,
            timed_out,
        });

        if status_code != 0 {
            return Err(JobError::new(
                format!("container exited with status {status_code}"),
                JobFailureReason::NonzeroReturnCode,
            )
            .with_context(FailureContext::new().with("return_code", status_code)));
        }
        Ok(())
    }

    async fn abort_job(&mut self) {
        if let Some(container_id) = self.container_id.take() {
            container::force_remove(&self.docker, &container_id).await;
        }
        if let Some(result) = self.execution_result.as_mut() {
            result.timed_out = true;
        } else {
            self.execution_result = Some(ExecutionResult {
                timed_out: true,
                ..Default::default()
            });
        }
    }

    async fn upload_results(&mut self) -> Result<JobResult, JobError> {
        let full = self
            .full
            .as_ref()
            .ok_or_else(|| JobError::new("upload_results called before prepare_full", JobFailureReason::UploadFailed))?;
        let artifacts_dir = self.artifacts_host_dir();
        let container_path = self.artifacts_container_path();

        let artifacts = artifacts::harvest(&artifacts_dir, &container_path, self.config.max_artifact_file_bytes);
        let upload_results = match &full.output_upload {
            Some(target) => {
                upload::upload(target, &artifacts_dir, &self.http, self.config.upload_max_attempts).await?
            }
            None => Default::default(),
        };

        let execution_result = self.execution_result.clone().unwrap_or_default();
        Ok(JobResult {
            docker_process_stdout: String::from_utf8_lossy(&execution_result.stdout).into_owned(),
            docker_process_stderr: String::from_utf8_lossy(&execution_result.stderr).into_owned(),
            artifacts,
            upload_results,
            specs: None,
        })
    }

    fn generate_streaming_certificate(
        &mut self,
        executor_ip: &str,
        public_key: &str,
    ) -> anyhow::Result<()> {
        self.certificate = Some(format!("streaming-cert:{executor_ip}:{public_key}"));
        Ok(())
    }

    fn is_streaming_job(&self) -> bool {
        self.initial
            .as_ref()
            .map(|i| i.streaming_details.is_some())
            .unwrap_or(false)
    }

    fn executor_certificate(&self) -> Option<&str> {
        self.certificate.as_deref()
    }

    fn execution_result(&self) -> Option<&ExecutionResult> {
        self.execution_result.as_ref()
    }

    async fn clean(&mut self) -> anyhow::Result<()> {
        if let Some(container_id) = self.container_id.take() {
            container::force_remove(&self.docker, &container_id).await;
        }
        Ok(())
    }
}
