//! Security gate run once at startup, before any untrusted job details are
//! even accepted: a CVE-2022-0492 container-escape probe, and (unless
//! running in debug-no-GPU mode) an NVIDIA Container Toolkit version check.
//!
//! Both checks run a short-lived, auto-removed container and inspect its
//! exit code and stdout. A probe failure is always a [`HordeError`] — this
//! is an executor/infrastructure fault, never the submitted job's.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::service::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;

use executor_core::{FailureContext, HordeError};

/// The driver's third collaborator, alongside [`executor_core::JobRunner`]
/// and [`executor_core::CoordinatorClient`]: whatever pre-flight check must
/// pass before any job-specific work begins. Kept as a trait (rather than
/// the driver depending on [`SecurityGate`] directly) so a test double can
/// stand in without a Docker Engine connection.
#[async_trait]
pub trait SecurityCheck: Send + Sync {
    async fn run(&self, skip_nvidia_check: bool) -> Result<(), HordeError>;
}

const CVE_2022_0492_IMAGE: &str =
    "us-central1-docker.pkg.dev/twistlock-secresearch/public/can-ctr-escape-cve-2022-0492:latest";
const CVE_2022_0492_EXPECTED_OUTPUT: &str = "Contained: cannot escape via CVE-2022-0492";

/// `NVIDIA_CONTAINER_TOOLKIT_MINIMUM_SAFE_VERSION`. CVE-2024-0132 fixed in
/// 1.16.2; CVE-2025-23359 fixed in 1.17.4.
const NVIDIA_TOOLKIT_MINIMUM_SAFE_VERSION: (u64, u64, u64) = (1, 17, 4);

/// Knobs for the security gate that a production deployment may need to
/// override — e.g. pointing the probe image somewhere reachable from an
/// air-gapped registry mirror.
#[derive(Debug, Clone)]
pub struct SecurityGateConfig {
    pub cve_2022_0492_image: String,
    pub nvidia_toolkit_minimum_version: semver::Version,
}

impl Default for SecurityGateConfig {
    fn default() -> Self {
        let (major, minor, patch) = NVIDIA_TOOLKIT_MINIMUM_SAFE_VERSION;
        Self {
            cve_2022_0492_image: CVE_2022_0492_IMAGE.to_string(),
            nvidia_toolkit_minimum_version: semver::Version::new(major, minor, patch),
        }
    }
}

/// Runs the two probe containers against a Docker Engine connection.
pub struct SecurityGate {
    docker: Docker,
    config: SecurityGateConfig,
}

impl SecurityGate {
    pub fn new(docker: Docker, config: SecurityGateConfig) -> Self {
        Self { docker, config }
    }

    async fn run_cve_2022_0492_check(&self) -> Result<(), HordeError> {
        let probe = run_probe_container(
            &self.docker,
            &self.config.cve_2022_0492_image,
            None,
            false,
            &[],
        )
        .await
        .map_err(|err| HordeError::new(format!("failed to run CVE-2022-0492 probe: {err}")))?;

        if probe.return_code != 0 {
            return Err(HordeError::security_check_failed(
                "CVE-2022-0492 check failed",
                FailureContext::new()
                    .with("return_code", probe.return_code)
                    .with("stdout", probe.stdout.clone())
                    .with("stderr", probe.stderr.clone()),
            ));
        }

        if !probe.stdout.contains(CVE_2022_0492_EXPECTED_OUTPUT) {
            return Err(HordeError::security_check_failed(
                format!(
                    "CVE-2022-0492 check failed: \"{CVE_2022_0492_EXPECTED_OUTPUT}\" not in stdout"
                ),
                FailureContext::new()
                    .with("stdout", probe.stdout)
                    .with("stderr", probe.stderr),
            ));
        }
        Ok(())
    }

    async fn run_nvidia_toolkit_version_check(&self) -> Result<(), HordeError> {
        let probe = run_probe_container(
            &self.docker,
            "ubuntu:latest",
            Some(vec![
                "bash".to_string(),
                "-c".to_string(),
                "nvidia-container-toolkit --version".to_string(),
            ]),
            true,
            &[
                "/:/host:ro".to_string(),
                "/usr/bin:/usr/bin".to_string(),
                "/usr/lib:/usr/lib".to_string(),
            ],
        )
        .await
        .map_err(|err| HordeError::new(format!("failed to run nvidia-container-toolkit probe: {err}")))?;

        if probe.return_code != 0 {
            return Err(HordeError::security_check_failed(
                format!("nvidia-container-toolkit check failed: exit code {}", probe.return_code),
                FailureContext::new()
                    .with("return_code", probe.return_code)
                    .with("stdout", probe.stdout)
                    .with("stderr", probe.stderr),
            ));
        }

        let Some(first_line) = probe.stdout.lines().next() else {
            return Err(HordeError::security_check_failed(
                "nvidia-container-toolkit check failed: no output from nvidia-container-toolkit",
                FailureContext::new()
                    .with("return_code", probe.return_code)
                    .with("stdout", probe.stdout)
                    .with("stderr", probe.stderr),
            ));
        };

        let version_str = first_line.rsplit(' ').next().unwrap_or(first_line);
        let version = semver::Version::parse(version_str).map_err(|err| {
            HordeError::security_check_failed(
                format!("could not parse nvidia-container-toolkit version \"{version_str}\": {err}"),
                FailureContext::new().with("stdout", first_line),
            )
        })?;

        if version < self.config.nvidia_toolkit_minimum_version {
            return Err(HordeError::security_check_failed(
                format!(
                    "outdated NVIDIA Container Toolkit detected: {version} not >= {}",
                    self.config.nvidia_toolkit_minimum_version
                ),
                FailureContext::new()
                    .with("return_code", probe.return_code)
                    .with("stdout", probe.stdout)
                    .with("stderr", probe.stderr),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SecurityCheck for SecurityGate {
    /// Runs the CVE probe, and the NVIDIA toolkit check unless
    /// `skip_nvidia_check` is set (debug-no-GPU mode).
    async fn run(&self, skip_nvidia_check: bool) -> Result<(), HordeError> {
        self.run_cve_2022_0492_check().await?;
        if !skip_nvidia_check {
            self.run_nvidia_toolkit_version_check().await?;
        }
        Ok(())
    }
}

struct ProbeResult {
    return_code: i64,
    stdout: String,
    stderr: String,
}

async fn run_probe_container(
    docker: &Docker,
    image: &str,
    cmd: Option<Vec<String>>,
    privileged: bool,
    binds: &[String],
) -> Result<ProbeResult, bollard::errors::Error> {
    let name = format!("security-probe-{}", uuid::Uuid::new_v4());

    let config = Config {
        image: Some(image.to_string()),
        cmd,
        host_config: Some(HostConfig {
            privileged: Some(privileged),
            binds: (!binds.is_empty()).then(|| binds.to_vec()),
            auto_remove: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    let created = docker
        .create_container(Some(CreateContainerOptions { name: name.as_str(), platform: None }), config)
        .await?;
    docker
        .start_container(&created.id, None::<StartContainerOptions<String>>)
        .await?;

    let mut wait_stream = docker.wait_container(
        &created.id,
        Some(WaitContainerOptions { condition: "not-running" }),
    );
    let return_code = match wait_stream.next().await {
        Some(Ok(response)) => response.status_code,
        Some(Err(err)) => {
            let _ = docker.remove_container(&created.id, Some(RemoveContainerOptions { force: true, ..Default::default() })).await;
            return Err(err);
        }
        None => 0,
    };

    let (stdout, stderr) = collect_text_logs(docker, &created.id).await;
    let _ = docker
        .remove_container(&created.id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
        .await;

    Ok(ProbeResult { return_code, stdout, stderr })
}

async fn collect_text_logs(docker: &Docker, container_id: &str) -> (String, String) {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut stream = docker.logs(
        container_id,
        Some(LogsOptions::<String> { stdout: true, stderr: true, ..Default::default() }),
    );
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(bollard::container::LogOutput::StdOut { message }) => {
                stdout.push_str(&String::from_utf8_lossy(&message))
            }
            Ok(bollard::container::LogOutput::StdErr { message }) => {
                stderr.push_str(&String::from_utf8_lossy(&message))
            }
            _ => {}
        }
    }
    (stdout, stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_published_cve_image_and_version_floor() {
        let config = SecurityGateConfig::default();
        assert!(config.cve_2022_0492_image.contains("can-ctr-escape-cve-2022-0492"));
        assert_eq!(config.nvidia_toolkit_minimum_version, semver::Version::new(1, 17, 4));
    }
}
