//! The two collaborator contracts the driver is built against.
//!
//! [`JobRunner`] and [`CoordinatorClient`] are defined here rather than in
//! `executor-driver` so that `executor-runner` (the concrete container/volume
//! backend) and a production transport can each implement them without
//! depending on the driver crate itself — only on these shared types.

use async_trait::async_trait;

use crate::errors::{HordeError, JobError};
use crate::protocol::{
    ExecutionResult, JobResult, MachineSpecs, V0HordeFailedRequest, V0InitialJobRequest,
    V0JobFailedRequest, V0JobRequest,
};
use crate::JobId;

/// The driver's collaborator for everything that touches the host: the
/// container runtime, the job's input volume, and its uploaded outputs.
///
/// Calls are made in a fixed order by the driver — `prepare_initial`,
/// `prepare_full`, `download_volume`, `start_job`, `await_completion`,
/// `upload_results` — and `clean` is invoked exactly once regardless of
/// how far that sequence got. Implementations do not retry internally
/// beyond what their own stage needs; the driver does not retry at all
/// (retry policy, if any, is this collaborator's concern, not the
/// driver's).
#[async_trait]
pub trait JobRunner: Send {
    /// Fingerprint the host machine. Called once at startup, skipped
    /// entirely in debug-no-GPU mode.
    async fn capture_machine_specs(&mut self) -> MachineSpecs;

    /// Record the initial request. No container or network activity yet.
    async fn prepare_initial(&mut self, initial: &V0InitialJobRequest) -> Result<(), JobError>;

    /// Record the full job body once it has arrived.
    async fn prepare_full(&mut self, full: &V0JobRequest) -> Result<(), JobError>;

    /// Materialize the job's input volume onto the host.
    async fn download_volume(&mut self) -> Result<(), JobError>;

    /// Create and start the job's container. Returns once the container is
    /// running; does not wait for it to exit.
    async fn start_job(&mut self) -> Result<(), JobError>;

    /// Wait for the running container to exit, collect its output, and tear
    /// it down. Populates [`JobRunner::execution_result`] on return,
    /// success or failure alike.
    async fn await_completion(&mut self) -> Result<(), JobError>;

    /// Force-stop and remove a container started by `start_job` without
    /// waiting for it to exit on its own. Called when the execution stage's
    /// deadline elapses while `await_completion` is still pending; swallows
    /// its own errors; best-effort only; the real teardown guarantee is
    /// `clean`.
    async fn abort_job(&mut self);

    /// Package and deliver collected artifacts per the job's upload target.
    async fn upload_results(&mut self) -> Result<JobResult, JobError>;

    /// Provision a TLS certificate for a streaming job's public endpoint.
    /// Only called when [`JobRunner::is_streaming_job`] is true.
    fn generate_streaming_certificate(
        &mut self,
        executor_ip: &str,
        public_key: &str,
    ) -> anyhow::Result<()>;

    /// Whether `streaming_details` was present on the initial request.
    fn is_streaming_job(&self) -> bool;

    /// The certificate generated by `generate_streaming_certificate`, if any.
    fn executor_certificate(&self) -> Option<&str>;

    /// The container's exit status and captured output, once
    /// `await_completion` has returned.
    fn execution_result(&self) -> Option<&ExecutionResult>;

    /// Idempotent last-resort teardown: stop/remove any container, delete
    /// any temp directory, regardless of which stage the job reached.
    /// Invoked exactly once, unconditionally, at the end of every job;
    /// errors are logged, never propagated.
    async fn clean(&mut self) -> anyhow::Result<()>;
}

/// The driver's collaborator for talking to the coordinator.
///
/// The three inbound methods each resolve exactly once per job; a second
/// call is a caller bug. Outbound sends are fire-and-forget from the
/// driver's perspective — it does not wait for an acknowledgement before
/// moving to the next stage.
#[async_trait]
pub trait CoordinatorClient: Send {
    /// The job this client was opened for.
    fn job_uuid(&self) -> JobId;

    /// Await the first inbound message.
    async fn initial_msg(&mut self) -> Result<V0InitialJobRequest, HordeError>;

    /// Await the second inbound message.
    async fn full_payload(&mut self) -> Result<V0JobRequest, HordeError>;

    async fn send_executor_ready(&mut self);
    async fn send_streaming_job_ready(&mut self, certificate: String);
    async fn send_volumes_ready(&mut self);
    async fn send_execution_done(&mut self);
    async fn send_result(&mut self, result: JobResult);
    async fn send_job_failed(&mut self, request: V0JobFailedRequest);
    async fn send_horde_failed(&mut self, request: V0HordeFailedRequest);
}
