//! The job driver state machine.

use executor_core::protocol::{
    JobParticipantType, TimingDetails, V0HordeFailedRequest, V0InitialJobRequest, V0JobFailedRequest,
};
use executor_core::{
    CoordinatorClient, DeadlineTimer, HordeError, JobError, JobFailureReason, JobRunner, JobStage,
};

use crate::failure_sink::{FailureSink, NoopFailureSink};
use crate::security::SecurityCheck;

#[derive(Debug, thiserror::Error)]
enum DriverFailure {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Horde(#[from] HordeError),
}

/// How a job ended, for the caller (typically a `main.rs`) to decide a
/// process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    Success,
    JobFailed,
    HordeFailed,
}

/// Rejects coordinator-supplied timing that isn't finite and non-negative
/// before any of it reaches [`DeadlineTimer`] — a miner can put an arbitrary
/// `f64` on the wire, and a bad value must surface as a clean horde failure
/// rather than a clamped-to-zero deadline that fails every stage with a
/// confusing timeout.
fn validate_timing(timing: &Option<TimingDetails>, timeout_seconds: Option<f64>) -> Result<(), HordeError> {
    let is_bad = |seconds: f64| !seconds.is_finite() || seconds < 0.0;

    if let Some(seconds) = timeout_seconds {
        if is_bad(seconds) {
            return Err(HordeError::new(format!("timeout_seconds is not a valid duration: {seconds}")));
        }
    }
    if let Some(t) = timing {
        for (name, seconds) in [
            ("allowed_leeway", t.allowed_leeway),
            ("download_time_limit", t.download_time_limit),
            ("execution_time_limit", t.execution_time_limit),
            ("streaming_start_time_limit", t.streaming_start_time_limit),
            ("upload_time_limit", t.upload_time_limit),
        ] {
            if is_bad(seconds) {
                return Err(HordeError::new(format!("executor_timing.{name} is not a valid duration: {seconds}")));
            }
        }
    }
    Ok(())
}

/// Runs exactly one job end-to-end against a [`JobRunner`] and a
/// [`CoordinatorClient`].
///
/// Consumes itself on [`JobDriver::execute`] — a driver instance is single
/// use, matching the one-job-per-process model.
pub struct JobDriver<R, C, G, F = NoopFailureSink> {
    runner: R,
    coordinator: C,
    gate: G,
    failure_sink: F,

    startup_time_limit: f64,
    debug_no_gpu_mode: bool,

    timer: DeadlineTimer,
    stage: JobStage,
    specs: Option<executor_core::protocol::MachineSpecs>,
}

impl<R, C, G> JobDriver<R, C, G, NoopFailureSink>
where
    R: JobRunner,
    C: CoordinatorClient,
    G: SecurityCheck,
{
    pub fn new(
        runner: R,
        coordinator: C,
        gate: G,
        startup_time_limit: f64,
        debug_no_gpu_mode: bool,
    ) -> Self {
        Self::with_failure_sink(
            runner,
            coordinator,
            gate,
            startup_time_limit,
            debug_no_gpu_mode,
            NoopFailureSink,
        )
    }
}

impl<R, C, G, F> JobDriver<R, C, G, F>
where
    R: JobRunner,
    C: CoordinatorClient,
    G: SecurityCheck,
    F: FailureSink,
{
    pub fn with_failure_sink(
        runner: R,
        coordinator: C,
        gate: G,
        startup_time_limit: f64,
        debug_no_gpu_mode: bool,
        failure_sink: F,
    ) -> Self {
        Self {
            runner,
            coordinator,
            gate,
            failure_sink,
            startup_time_limit,
            debug_no_gpu_mode,
            timer: DeadlineTimer::new(),
            stage: JobStage::Unknown,
            specs: None,
        }
    }

    /// Run the job to completion. Never panics and never leaves a container
    /// or temp directory behind: `runner.clean()` runs exactly once,
    /// regardless of outcome.
    pub async fn execute(mut self) -> DriverOutcome {
        let result = self.run().await;
        let outcome = match result {
            Ok(()) => DriverOutcome::Success,
            Err(DriverFailure::Job(err)) => {
                tracing::error!(error = %err, stage = %self.stage, "job failed");
                self.send_job_failed(err).await;
                DriverOutcome::JobFailed
            }
            Err(DriverFailure::Horde(err)) => {
                self.failure_sink.capture(self.stage, &err);
                self.send_horde_failed(err).await;
                DriverOutcome::HordeFailed
            }
        };
        self.clean().await;
        outcome
    }

    async fn run(&mut self) -> Result<(), DriverFailure> {
        self.timer.set(self.startup_time_limit);
        let initial = tokio::time::timeout(self.timer.time_left_duration(), self.startup_stage())
            .await
            .map_err(|_| HordeError::new("Timed out waiting for initial job details from miner"))??;
        let timing = initial.executor_timing.clone();
        validate_timing(&timing, initial.timeout_seconds)?;

        match (&timing, initial.timeout_seconds) {
            (Some(t), _) => self.timer.set(t.allowed_leeway),
            (None, Some(seconds)) => self.timer.set(seconds),
            (None, None) => {
                return Err(HordeError::new(
                    "No timing received: either timeout_seconds or timing_details must be set",
                )
                .into())
            }
        }

        if let Some(t) = &timing {
            self.timer.extend(t.download_time_limit);
        }
        tokio::time::timeout(self.timer.time_left_duration(), self.download_stage())
            .await
            .map_err(|_| JobError::new("Download time exceeded", JobFailureReason::Timeout))??;

        if let Some(t) = &timing {
            self.timer.extend(t.execution_time_limit);
            if self.runner.is_streaming_job() {
                self.timer.extend(t.streaming_start_time_limit);
            }
        }
        let execution = tokio::time::timeout(self.timer.time_left_duration(), self.execution_stage()).await;
        if execution.is_err() {
            self.runner.abort_job().await;
        }
        execution.map_err(|_| JobError::new("Execution time exceeded", JobFailureReason::Timeout))??;

        if let Some(t) = &timing {
            self.timer.extend(t.upload_time_limit);
        }
        tokio::time::timeout(self.timer.time_left_duration(), self.upload_stage())
            .await
            .map_err(|_| JobError::new("Upload time exceeded", JobFailureReason::Timeout))??;

        tracing::debug!(time_left = self.timer.time_left(), "job finished");
        Ok(())
    }

    fn enter_stage(&mut self, stage: JobStage) {
        self.stage = stage;
        tracing::debug!(%stage, time_left = self.timer.time_left(), "entering stage");
    }

    async fn startup_stage(&mut self) -> Result<V0InitialJobRequest, DriverFailure> {
        self.enter_stage(JobStage::ExecutorStartup);
        if !self.debug_no_gpu_mode {
            self.specs = Some(self.runner.capture_machine_specs().await);
        }
        self.gate.run(self.debug_no_gpu_mode).await?;

        let initial = self.coordinator.initial_msg().await?;
        self.runner.prepare_initial(&initial).await?;
        self.coordinator.send_executor_ready().await;

        if let Some(streaming) = &initial.streaming_details {
            let executor_ip = streaming.executor_ip.as_deref().ok_or_else(|| {
                HordeError::new("streaming_details.executor_ip is missing")
            })?;
            self.runner
                .generate_streaming_certificate(executor_ip, &streaming.public_key)
                .map_err(|err| HordeError::new(format!("failed to generate streaming certificate: {err}")))?;
        }
        Ok(initial)
    }

    async fn download_stage(&mut self) -> Result<(), DriverFailure> {
        self.enter_stage(JobStage::VolumeDownload);
        let full = self.coordinator.full_payload().await?;
        self.runner.prepare_full(&full).await?;
        self.runner.download_volume().await?;
        self.coordinator.send_volumes_ready().await;
        Ok(())
    }

    async fn execution_stage(&mut self) -> Result<(), DriverFailure> {
        self.enter_stage(JobStage::Execution);
        self.runner.start_job().await?;
        if self.runner.is_streaming_job() {
            let certificate = self
                .runner
                .executor_certificate()
                .ok_or_else(|| HordeError::new("Executor certificate is missing"))?
                .to_string();
            self.coordinator.send_streaming_job_ready(certificate).await;
        }
        self.runner.await_completion().await?;
        self.fail_if_execution_unsuccessful()?;
        self.coordinator.send_execution_done().await;
        Ok(())
    }

    async fn upload_stage(&mut self) -> Result<(), DriverFailure> {
        self.enter_stage(JobStage::ResultUpload);
        let mut result = self.runner.upload_results().await?;
        result.specs = self.specs.clone();
        self.coordinator.send_result(result).await;
        Ok(())
    }

    fn fail_if_execution_unsuccessful(&self) -> Result<(), DriverFailure> {
        let result = self
            .runner
            .execution_result()
            .ok_or_else(|| HordeError::new("no execution result"))?;

        if result.timed_out {
            return Err(
                JobError::new("Job container timed out during execution", JobFailureReason::Timeout).into(),
            );
        }
        if result.return_code != 0 {
            return Err(JobError::new(
                format!(
                    "Job container exited with non-zero exit code: {}",
                    result.return_code
                ),
                JobFailureReason::NonzeroReturnCode,
            )
            .into());
        }
        Ok(())
    }

    async fn send_job_failed(&mut self, err: JobError) {
        let execution_result = self.runner.execution_result().cloned();
        let request = V0JobFailedRequest {
            job_uuid: self.coordinator.job_uuid(),
            stage: self.stage,
            reason: err.reason,
            message: err.message,
            docker_process_exit_status: execution_result.as_ref().map(|r| r.return_code),
            docker_process_stdout: execution_result
                .as_ref()
                .map(|r| String::from_utf8_lossy(&r.stdout).into_owned()),
            docker_process_stderr: execution_result
                .as_ref()
                .map(|r| String::from_utf8_lossy(&r.stderr).into_owned()),
            context: (!err.context.is_empty()).then_some(err.context),
        };
        self.coordinator.send_job_failed(request).await;
    }

    async fn send_horde_failed(&mut self, mut err: HordeError) {
        err.add_context("stage", self.stage.to_string());
        let request = V0HordeFailedRequest {
            job_uuid: self.coordinator.job_uuid(),
            reported_by: JobParticipantType::Executor,
            reason: err.reason,
            message: err.message,
            context: (!err.context.is_empty()).then_some(err.context),
        };
        self.coordinator.send_horde_failed(request).await;
    }

    async fn clean(&mut self) {
        if let Err(err) = self.runner.clean().await {
            tracing::error!(error = %err, "job cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use executor_core::protocol::{
        ExecutionResult, JobResult, StreamingDetails, TimingDetails, V0InitialJobRequest, V0JobRequest, Volume,
    };
    use executor_core::{HordeFailureReason, JobId};

    use crate::testing::{NoopSecurityGate, SentMessage, StubCoordinator, StubRunner};

    use super::*;

    fn job_id() -> JobId {
        JobId(uuid::Uuid::new_v4())
    }

    fn initial_request(job_uuid: JobId, timing: Option<TimingDetails>) -> V0InitialJobRequest {
        V0InitialJobRequest {
            executor_class: "spin_up-4min.gpu-24gb".to_string(),
            docker_image: "backenddevelopersltd/executor-echo:v0-latest".to_string(),
            job_uuid,
            job_started_receipt_payload: String::new(),
            job_started_receipt_signature: String::new(),
            timeout_seconds: if timing.is_none() { Some(30.0) } else { None },
            executor_timing: timing,
            streaming_details: None,
            volume_type: None,
        }
    }

    fn full_request(job_uuid: JobId) -> V0JobRequest {
        V0JobRequest {
            docker_image: "backenddevelopersltd/executor-echo:v0-latest".to_string(),
            docker_run_cmd: Vec::new(),
            docker_run_options_preset: String::new(),
            volume: Volume::Inline {
                contents: "UEsDBA==".to_string(),
            },
            output_upload: None,
            raw_script: None,
            artifacts_dir: None,
            job_uuid,
        }
    }

    fn timing() -> TimingDetails {
        TimingDetails {
            allowed_leeway: 30.0,
            download_time_limit: 30.0,
            execution_time_limit: 30.0,
            streaming_start_time_limit: 30.0,
            upload_time_limit: 30.0,
        }
    }

    fn no_op_gate() -> NoopSecurityGate {
        NoopSecurityGate
    }

    #[tokio::test]
    async fn happy_path_sends_messages_in_order_and_cleans_up() {
        let uuid = job_id();
        let coordinator = StubCoordinator::new(uuid)
            .with_initial(initial_request(uuid, Some(timing())))
            .with_full(full_request(uuid));
        let runner = StubRunner::happy_path();
        let sent_log = coordinator.log();
        let call_log = runner.log();

        let driver = JobDriver::new(runner, coordinator, no_op_gate(), 30.0, true);
        let outcome = driver.execute().await;

        assert_eq!(outcome, DriverOutcome::Success);
        let sent = sent_log.lock().expect("sent log poisoned").clone();
        assert_eq!(
            sent,
            vec![
                SentMessage::ExecutorReady,
                SentMessage::VolumesReady,
                SentMessage::ExecutionDone,
                SentMessage::Result(JobResult::default()),
            ]
        );
        assert!(call_log.lock().expect("call log poisoned").contains(&"clean"));
    }

    #[tokio::test]
    async fn streaming_job_sends_streaming_ready_between_volumes_ready_and_execution_done() {
        let uuid = job_id();
        let mut initial = initial_request(uuid, Some(timing()));
        initial.streaming_details = Some(StreamingDetails {
            executor_ip: Some("127.0.0.1".to_string()),
            public_key: "PK".to_string(),
        });
        let coordinator = StubCoordinator::new(uuid).with_initial(initial).with_full(full_request(uuid));
        let runner = StubRunner::happy_path().streaming("streaming-cert:127.0.0.1:PK");
        let sent_log = coordinator.log();

        let driver = JobDriver::new(runner, coordinator, no_op_gate(), 30.0, true);
        let outcome = driver.execute().await;

        assert_eq!(outcome, DriverOutcome::Success);
        let sent = sent_log.lock().expect("sent log poisoned").clone();
        assert_eq!(
            sent,
            vec![
                SentMessage::ExecutorReady,
                SentMessage::VolumesReady,
                SentMessage::StreamingJobReady("streaming-cert:127.0.0.1:PK".to_string()),
                SentMessage::ExecutionDone,
                SentMessage::Result(JobResult::default()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_timing_and_timeout_seconds_yields_horde_failure_at_startup_stage() {
        let uuid = job_id();
        let mut initial = initial_request(uuid, None);
        initial.timeout_seconds = None;
        let coordinator = StubCoordinator::new(uuid).with_initial(initial);
        let runner = StubRunner::happy_path();
        let sent_log = coordinator.log();

        let driver = JobDriver::new(runner, coordinator, no_op_gate(), 30.0, true);
        let outcome = driver.execute().await;

        assert_eq!(outcome, DriverOutcome::HordeFailed);
        let sent = sent_log.lock().expect("sent log poisoned").clone();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            SentMessage::HordeFailed(request) => {
                assert_eq!(request.reason, HordeFailureReason::Unexpected);
            }
            other => panic!("expected a horde failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn negative_timing_yields_horde_failure_instead_of_panicking() {
        let uuid = job_id();
        let mut bad_timing = timing();
        bad_timing.execution_time_limit = -5.0;
        let coordinator = StubCoordinator::new(uuid)
            .with_initial(initial_request(uuid, Some(bad_timing)))
            .with_full(full_request(uuid));
        let runner = StubRunner::happy_path();
        let sent_log = coordinator.log();

        let driver = JobDriver::new(runner, coordinator, no_op_gate(), 30.0, true);
        let outcome = driver.execute().await;

        assert_eq!(outcome, DriverOutcome::HordeFailed);
        let sent = sent_log.lock().expect("sent log poisoned").clone();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            SentMessage::HordeFailed(request) => {
                assert!(request.message.contains("execution_time_limit"));
            }
            other => panic!("expected a horde failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_finite_timeout_seconds_yields_horde_failure_instead_of_panicking() {
        let uuid = job_id();
        let mut initial = initial_request(uuid, None);
        initial.timeout_seconds = Some(f64::NAN);
        let coordinator = StubCoordinator::new(uuid).with_initial(initial);
        let runner = StubRunner::happy_path();
        let sent_log = coordinator.log();

        let driver = JobDriver::new(runner, coordinator, no_op_gate(), 30.0, true);
        let outcome = driver.execute().await;

        assert_eq!(outcome, DriverOutcome::HordeFailed);
        let sent = sent_log.lock().expect("sent log poisoned").clone();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            SentMessage::HordeFailed(request) => {
                assert!(request.message.contains("timeout_seconds"));
            }
            other => panic!("expected a horde failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_yields_job_failure_with_execution_stage() {
        let uuid = job_id();
        let coordinator = StubCoordinator::new(uuid)
            .with_initial(initial_request(uuid, Some(timing())))
            .with_full(full_request(uuid));
        let mut runner = StubRunner::happy_path();
        runner.execution_result = Some(ExecutionResult {
            return_code: 1,
            ..Default::default()
        });
        let sent_log = coordinator.log();

        let driver = JobDriver::new(runner, coordinator, no_op_gate(), 30.0, true);
        let outcome = driver.execute().await;

        assert_eq!(outcome, DriverOutcome::JobFailed);
        let sent = sent_log.lock().expect("sent log poisoned").clone();
        match sent.last().expect("at least one message sent") {
            SentMessage::JobFailed(request) => {
                assert_eq!(request.stage, JobStage::Execution);
                assert_eq!(request.reason, JobFailureReason::NonzeroReturnCode);
            }
            other => panic!("expected a job failure, got {other:?}"),
        }
    }
}
