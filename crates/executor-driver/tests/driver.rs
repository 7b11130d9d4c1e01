//! Integration coverage for [`executor_driver::JobDriver`] through its
//! public API only, using the `testing` feature's in-memory doubles — this
//! crate built as a dependency of its own test binary, the way any external
//! consumer would drive it.

use executor_core::protocol::{
    ExecutionResult, JobResult, StreamingDetails, TimingDetails, V0InitialJobRequest, V0JobRequest, Volume,
};
use executor_core::{HordeFailureReason, JobFailureReason, JobId, JobStage};
use executor_driver::testing::{NoopSecurityGate, SentMessage, StubCoordinator, StubRunner};
use executor_driver::{DriverOutcome, JobDriver};

fn job_id() -> JobId {
    JobId(uuid::Uuid::new_v4())
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
        volume: Volume::Inline { contents: "UEsDBA==".to_string() },
        output_upload: None,
        raw_script: None,
        artifacts_dir: None,
        job_uuid,
    }
}

#[tokio::test]
async fn s1_happy_path_single_timeout() {
    let uuid = job_id();
    let coordinator = StubCoordinator::new(uuid)
        .with_initial(initial_request(uuid, None))
        .with_full(full_request(uuid));
    let runner = StubRunner::happy_path();
    let sent_log = coordinator.log();

    let driver = JobDriver::new(runner, coordinator, NoopSecurityGate, 30.0, true);
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
}

#[tokio::test]
async fn s2_streaming_job_sends_streaming_ready() {
    let uuid = job_id();
    let mut initial = initial_request(uuid, Some(timing()));
    initial.streaming_details = Some(StreamingDetails {
        executor_ip: Some("127.0.0.1".to_string()),
        public_key: "PK".to_string(),
    });
    let coordinator = StubCoordinator::new(uuid).with_initial(initial).with_full(full_request(uuid));
    let runner = StubRunner::happy_path().streaming("streaming-cert:127.0.0.1:PK");
    let sent_log = coordinator.log();

    let driver = JobDriver::new(runner, coordinator, NoopSecurityGate, 30.0, true);
    let outcome = driver.execute().await;

    assert_eq!(outcome, DriverOutcome::Success);
    let sent = sent_log.lock().expect("sent log poisoned").clone();
    assert!(sent.contains(&SentMessage::StreamingJobReady("streaming-cert:127.0.0.1:PK".to_string())));
}

#[tokio::test]
async fn s8_missing_timing_yields_horde_failure_at_startup_stage() {
    let uuid = job_id();
    let mut initial = initial_request(uuid, None);
    initial.timeout_seconds = None;
    let coordinator = StubCoordinator::new(uuid).with_initial(initial);
    let runner = StubRunner::happy_path();
    let sent_log = coordinator.log();

    let driver = JobDriver::new(runner, coordinator, NoopSecurityGate, 30.0, true);
    let outcome = driver.execute().await;

    assert_eq!(outcome, DriverOutcome::HordeFailed);
    let sent = sent_log.lock().expect("sent log poisoned").clone();
    match sent.last().expect("at least one message sent") {
        SentMessage::HordeFailed(request) => assert_eq!(request.reason, HordeFailureReason::Unexpected),
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
    runner.execution_result = Some(ExecutionResult { return_code: 1, ..Default::default() });
    let sent_log = coordinator.log();

    let driver = JobDriver::new(runner, coordinator, NoopSecurityGate, 30.0, true);
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
