//! Low-level Docker Engine API calls, wrapped so `runner.rs` reads as the
//! job lifecycle rather than a sequence of `bollard` calls.

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::{DeviceRequest, HostConfig};
use bollard::Docker;
use futures_util::StreamExt;

/// Pull `image`, logging progress frames at debug level and tolerating
/// individual frame errors (a slow registry emitting a stalled layer isn't
/// fatal on its own; the eventual timeout around the whole download stage
/// is what bounds this).
pub async fn pull_image(docker: &Docker, image: &str) -> Result<(), bollard::errors::Error> {
    let mut stream = docker.create_image(
        Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        }),
        None,
        None,
    );
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(progress) => tracing::debug!(?progress, "image pull progress"),
            Err(err) => tracing::warn!(%err, "image pull frame error"),
        }
    }
    Ok(())
}

/// Options accepted when creating the job's container.
pub struct ContainerSpec<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    pub binds: Vec<String>,
    pub gpu_enabled: bool,
}

pub async fn create_and_start(
    docker: &Docker,
    spec: ContainerSpec<'_>,
) -> Result<String, bollard::errors::Error> {
    let device_requests = spec.gpu_enabled.then(|| {
        vec![DeviceRequest {
            driver: Some("nvidia".to_string()),
            count: Some(-1),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }]
    });

    let config = Config {
        image: Some(spec.image.to_string()),
        cmd: (!spec.cmd.is_empty()).then_some(spec.cmd),
        working_dir: spec.working_dir,
        host_config: Some(HostConfig {
            binds: (!spec.binds.is_empty()).then_some(spec.binds),
            device_requests,
            ..Default::default()
        }),
        ..Default::default()
    };

    let created = docker
        .create_container(
            Some(CreateContainerOptions {
                name: spec.name,
                platform: None,
            }),
            config,
        )
        .await?;
    docker
        .start_container(&created.id, None::<StartContainerOptions<String>>)
        .await?;
    Ok(created.id)
}

/// Block until the container exits, returning its status code.
pub async fn wait_for_exit(docker: &Docker, container_id: &str) -> Result<i64, bollard::errors::Error> {
    let mut stream = docker.wait_container(
        container_id,
        Some(WaitContainerOptions {
            condition: "not-running",
        }),
    );
    match stream.next().await {
        Some(Ok(response)) => Ok(response.status_code),
        Some(Err(err)) => Err(err),
        None => Ok(0),
    }
}

pub async fn collect_logs(
    docker: &Docker,
    container_id: &str,
) -> Result<(Vec<u8>, Vec<u8>), bollard::errors::Error> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut stream = docker.logs(
        container_id,
        Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        }),
    );
    while let Some(frame) = stream.next().await {
        match frame? {
            bollard::container::LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
            bollard::container::LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
            _ => {}
        }
    }
    Ok((stdout, stderr))
}

/// Force-kill and remove; swallows "already gone" errors since callers use
/// this both for normal teardown and for best-effort abort paths.
pub async fn force_remove(docker: &Docker, container_id: &str) {
    let _ = docker
        .kill_container(container_id, None::<KillContainerOptions<String>>)
        .await;
    let _ = docker
        .remove_container(
            container_id,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await;
}
