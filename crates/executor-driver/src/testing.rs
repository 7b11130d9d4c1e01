//! In-memory test doubles for [`JobRunner`], [`CoordinatorClient`], and
//! [`SecurityCheck`].
//!
//! Compiled under `cfg(test)` for this crate's own unit tests, and under the
//! `testing` feature for the `tests/` integration suite (a separate crate
//! that can't see items gated on `cfg(test)`) — both exist purely to let
//! test code exercise [`crate::JobDriver`] without a Docker Engine
//! connection or a live coordinator transport.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use executor_core::protocol::{
    ExecutionResult, JobResult, MachineSpecs, V0HordeFailedRequest, V0InitialJobRequest,
    V0JobFailedRequest, V0JobRequest,
};
use executor_core::{CoordinatorClient, HordeError, JobError, JobId, JobRunner};

use crate::security::SecurityCheck;

/// A [`SecurityCheck`] that always passes, for driver tests that aren't
/// exercising the security gate itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSecurityGate;

#[async_trait]
impl SecurityCheck for NoopSecurityGate {
    async fn run(&self, _skip_nvidia_check: bool) -> Result<(), HordeError> {
        Ok(())
    }
}

/// Every outbound call a [`StubCoordinator`] observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SentMessage {
    ExecutorReady,
    StreamingJobReady(String),
    VolumesReady,
    ExecutionDone,
    Result(JobResult),
    JobFailed(V0JobFailedRequest),
    HordeFailed(V0HordeFailedRequest),
}

/// A [`CoordinatorClient`] whose two inbound reads are preset and whose
/// outbound sends are recorded for later assertion.
pub struct StubCoordinator {
    job_uuid: JobId,
    initial: Option<Result<V0InitialJobRequest, HordeError>>,
    full: Option<Result<V0JobRequest, HordeError>>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl StubCoordinator {
    pub fn new(job_uuid: JobId) -> Self {
        Self {
            job_uuid,
            initial: None,
            full: None,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A handle to the outbound-message log, clonable before the coordinator
    /// is moved into a [`crate::JobDriver`] that consumes it on `execute()`.
    pub fn log(&self) -> Arc<Mutex<Vec<SentMessage>>> {
        self.sent.clone()
    }

    pub fn with_initial(mut self, initial: V0InitialJobRequest) -> Self {
        self.initial = Some(Ok(initial));
        self
    }

    pub fn with_initial_failure(mut self, err: HordeError) -> Self {
        self.initial = Some(Err(err));
        self
    }

    pub fn with_full(mut self, full: V0JobRequest) -> Self {
        self.full = Some(Ok(full));
        self
    }

    pub fn with_full_failure(mut self, err: HordeError) -> Self {
        self.full = Some(Err(err));
        self
    }
}

#[async_trait]
impl CoordinatorClient for StubCoordinator {
    fn job_uuid(&self) -> JobId {
        self.job_uuid
    }

    async fn initial_msg(&mut self) -> Result<V0InitialJobRequest, HordeError> {
        self.initial
            .take()
            .unwrap_or_else(|| Err(HordeError::new("StubCoordinator: no initial message queued")))
    }

    async fn full_payload(&mut self) -> Result<V0JobRequest, HordeError> {
        self.full
            .take()
            .unwrap_or_else(|| Err(HordeError::new("StubCoordinator: no full payload queued")))
    }

    async fn send_executor_ready(&mut self) {
        self.sent.lock().expect("sent log poisoned").push(SentMessage::ExecutorReady);
    }

    async fn send_streaming_job_ready(&mut self, certificate: String) {
        self.sent
            .lock()
            .expect("sent log poisoned")
            .push(SentMessage::StreamingJobReady(certificate));
    }

    async fn send_volumes_ready(&mut self) {
        self.sent.lock().expect("sent log poisoned").push(SentMessage::VolumesReady);
    }

    async fn send_execution_done(&mut self) {
        self.sent.lock().expect("sent log poisoned").push(SentMessage::ExecutionDone);
    }

    async fn send_result(&mut self, result: JobResult) {
        self.sent.lock().expect("sent log poisoned").push(SentMessage::Result(result));
    }

    async fn send_job_failed(&mut self, request: V0JobFailedRequest) {
        self.sent.lock().expect("sent log poisoned").push(SentMessage::JobFailed(request));
    }

    async fn send_horde_failed(&mut self, request: V0HordeFailedRequest) {
        self.sent.lock().expect("sent log poisoned").push(SentMessage::HordeFailed(request));
    }
}

/// A [`JobRunner`] whose stage results are preset and whose call order is
/// recorded for later assertion.
#[derive(Default)]
pub struct StubRunner {
    pub prepare_initial_result: Option<Result<(), JobError>>,
    pub prepare_full_result: Option<Result<(), JobError>>,
    pub download_volume_result: Option<Result<(), JobError>>,
    pub start_job_result: Option<Result<(), JobError>>,
    pub await_completion_result: Option<Result<(), JobError>>,
    pub upload_results_result: Option<Result<JobResult, JobError>>,
    pub streaming: bool,
    pub certificate: Option<String>,
    pub execution_result: Option<ExecutionResult>,
    pub generate_certificate_result: Option<anyhow::Result<()>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl StubRunner {
    pub fn happy_path() -> Self {
        Self {
            prepare_initial_result: Some(Ok(())),
            prepare_full_result: Some(Ok(())),
            download_volume_result: Some(Ok(())),
            start_job_result: Some(Ok(())),
            await_completion_result: Some(Ok(())),
            upload_results_result: Some(Ok(JobResult::default())),
            execution_result: Some(ExecutionResult {
                return_code: 0,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn streaming(mut self, certificate: impl Into<String>) -> Self {
        self.streaming = true;
        self.certificate = Some(certificate.into());
        self.generate_certificate_result = Some(Ok(()));
        self
    }

    /// A handle to the call-order log, clonable before the runner is moved
    /// into a [`crate::JobDriver`] that consumes it on `execute()`.
    pub fn log(&self) -> Arc<Mutex<Vec<&'static str>>> {
        self.calls.clone()
    }
}

fn take<T>(slot: &mut Option<Result<T, JobError>>, fallback_message: &'static str) -> Result<T, JobError> {
    slot.take()
        .unwrap_or_else(|| Err(JobError::new(fallback_message, executor_core::JobFailureReason::Timeout)))
}

#[async_trait]
impl JobRunner for StubRunner {
    async fn capture_machine_specs(&mut self) -> MachineSpecs {
        self.calls.lock().expect("call log poisoned").push("capture_machine_specs");
        MachineSpecs {
            captured_at: chrono::Utc::now(),
            document: serde_json::json!({}),
        }
    }

    async fn prepare_initial(&mut self, _initial: &V0InitialJobRequest) -> Result<(), JobError> {
        self.calls.lock().expect("call log poisoned").push("prepare_initial");
        take(&mut self.prepare_initial_result, "StubRunner: prepare_initial not queued")
    }

    async fn prepare_full(&mut self, _full: &V0JobRequest) -> Result<(), JobError> {
        self.calls.lock().expect("call log poisoned").push("prepare_full");
        take(&mut self.prepare_full_result, "StubRunner: prepare_full not queued")
    }

    async fn download_volume(&mut self) -> Result<(), JobError> {
        self.calls.lock().expect("call log poisoned").push("download_volume");
        take(&mut self.download_volume_result, "StubRunner: download_volume not queued")
    }

    async fn start_job(&mut self) -> Result<(), JobError> {
        self.calls.lock().expect("call log poisoned").push("start_job");
        take(&mut self.start_job_result, "StubRunner: start_job not queued")
    }

    async fn await_completion(&mut self) -> Result<(), JobError> {
        self.calls.lock().expect("call log poisoned").push("await_completion");
        take(&mut self.await_completion_result, "StubRunner: await_completion not queued")
    }

    async fn abort_job(&mut self) {
        self.calls.lock().expect("call log poisoned").push("abort_job");
    }

    async fn upload_results(&mut self) -> Result<JobResult, JobError> {
        self.calls.lock().expect("call log poisoned").push("upload_results");
        take(&mut self.upload_results_result, "StubRunner: upload_results not queued")
    }

    fn generate_streaming_certificate(&mut self, _executor_ip: &str, _public_key: &str) -> anyhow::Result<()> {
        self.calls.lock().expect("call log poisoned").push("generate_streaming_certificate");
        self.generate_certificate_result
            .take()
            .unwrap_or_else(|| Err(anyhow::anyhow!("StubRunner: generate_streaming_certificate not queued")))
    }

    fn is_streaming_job(&self) -> bool {
        self.streaming
    }

    fn executor_certificate(&self) -> Option<&str> {
        self.certificate.as_deref()
    }

    fn execution_result(&self) -> Option<&ExecutionResult> {
        self.execution_result.as_ref()
    }

    async fn clean(&mut self) -> anyhow::Result<()> {
        self.calls.lock().expect("call log poisoned").push("clean");
        Ok(())
    }
}
