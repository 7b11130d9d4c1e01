//! JSON-framed coordinator wire messages (§6).
//!
//! Inbound message bodies (`V0InitialJobRequest`, `V0JobRequest`) are
//! consumed exactly once each by the driver. Outbound messages are grouped
//! under [`OutboundMessage`], internally tagged by `message_type` so the
//! transport can frame them without each caller threading a discriminator
//! by hand.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Per-stage time budget, received in `V0InitialJobRequest.executor_timing`.
///
/// All fields are non-negative seconds. Immutable once received.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingDetails {
    pub allowed_leeway: f64,
    pub download_time_limit: f64,
    pub execution_time_limit: f64,
    pub streaming_start_time_limit: f64,
    pub upload_time_limit: f64,
}

/// Streaming endpoint negotiation carried in the initial request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingDetails {
    pub executor_ip: Option<String>,
    pub public_key: String,
}

/// First inbound message: announces the job and its timing budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V0InitialJobRequest {
    pub executor_class: String,
    pub docker_image: String,
    pub job_uuid: JobId,
    pub job_started_receipt_payload: String,
    pub job_started_receipt_signature: String,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub executor_timing: Option<TimingDetails>,
    #[serde(default)]
    pub streaming_details: Option<StreamingDetails>,
    #[serde(default)]
    pub volume_type: Option<String>,
}

/// A volume source, discriminated on the wire by `volume_type`.
///
/// An unrecognized `volume_type` fails deserialization rather than being
/// silently dropped, per the "tagged unions on the wire" design note (§9) —
/// `serde_json::from_*` on an unknown tag returns an `Err` that the caller
/// maps to a `HordeError`, it is never swallowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "volume_type", rename_all = "snake_case")]
pub enum Volume {
    /// Base64-encoded zip archive inlined directly in the request.
    Inline { contents: String },
    /// Zip archive fetched from a URL.
    ZipUrl { url: String },
    /// A single file fetched from a URL, placed at `relative_path`.
    SingleFile { url: String, relative_path: String },
    /// Composition of several sub-volumes, applied in order.
    MultiVolume { volumes: Vec<Volume> },
    /// A model-hub snapshot (e.g. Hugging Face Hub).
    HuggingfaceVolume {
        repo_id: String,
        #[serde(default)]
        revision: Option<String>,
        #[serde(default)]
        repo_type: Option<String>,
        #[serde(default)]
        allow_patterns: Option<Vec<String>>,
    },
}

/// Where and how to deliver collected outputs, discriminated by
/// `output_upload_type`. See [`Volume`] for the unknown-tag policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_upload_type", rename_all = "snake_case")]
pub enum OutputUpload {
    ZipAndHttpPost {
        url: String,
        #[serde(default)]
        form_fields: BTreeMap<String, String>,
    },
    ZipAndHttpPut {
        url: String,
    },
    SingleFilePost {
        url: String,
        relative_path: String,
        #[serde(default)]
        form_fields: BTreeMap<String, String>,
    },
    SingleFilePut {
        url: String,
        relative_path: String,
    },
    MultiUpload {
        uploads: Vec<OutputUpload>,
        #[serde(default)]
        system_output: Option<Box<OutputUpload>>,
    },
}

/// Second inbound message: the job body (volume, command, upload target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V0JobRequest {
    pub docker_image: String,
    #[serde(default)]
    pub docker_run_cmd: Vec<String>,
    #[serde(default)]
    pub docker_run_options_preset: String,
    pub volume: Volume,
    #[serde(default)]
    pub output_upload: Option<OutputUpload>,
    #[serde(default)]
    pub raw_script: Option<String>,
    #[serde(default)]
    pub artifacts_dir: Option<String>,
    pub job_uuid: JobId,
}

/// Result of the container run, produced by the job runner.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub return_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// Opaque host hardware fingerprint, captured once during startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpecs {
    pub captured_at: DateTime<Utc>,
    pub document: serde_json::Value,
}

/// Final payload delivered to the coordinator on success.
#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub docker_process_stdout: String,
    pub docker_process_stderr: String,
    /// `absolute_path -> base64(contents)`, capped per-file (§6).
    pub artifacts: BTreeMap<String, String>,
    /// `upload name -> JSON-encoded response body`.
    pub upload_results: BTreeMap<String, String>,
    pub specs: Option<MachineSpecs>,
}

/// Which party the coordinator should attribute a horde failure to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobParticipantType {
    Executor,
}

#[derive(Debug, Clone, Serialize)]
pub struct V0ExecutorReadyRequest {
    pub job_uuid: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V0StreamingJobReadyRequest {
    pub job_uuid: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_token: Option<String>,
    pub public_key: String,
    pub ip: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V0VolumesReadyRequest {
    pub job_uuid: JobId,
}

#[derive(Debug, Clone, Serialize)]
pub struct V0ExecutionDoneRequest {
    pub job_uuid: JobId,
}

#[derive(Debug, Clone, Serialize)]
pub struct V0JobFinishedRequest {
    pub job_uuid: JobId,
    pub docker_process_stdout: String,
    pub docker_process_stderr: String,
    pub artifacts: BTreeMap<String, String>,
    pub upload_results: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V0JobFailedRequest {
    pub job_uuid: JobId,
    pub stage: crate::JobStage,
    pub reason: crate::JobFailureReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_process_exit_status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_process_stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_process_stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<crate::FailureContext>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V0HordeFailedRequest {
    pub job_uuid: JobId,
    pub reported_by: JobParticipantType,
    pub reason: crate::HordeFailureReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<crate::FailureContext>,
}

/// Outbound status message envelope, internally tagged by `message_type` to
/// match the coordinator's JSON framing (§6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "message_type")]
pub enum OutboundMessage {
    V0ExecutorReadyRequest(V0ExecutorReadyRequest),
    V0StreamingJobReadyRequest(V0StreamingJobReadyRequest),
    V0VolumesReadyRequest(V0VolumesReadyRequest),
    V0ExecutionDoneRequest(V0ExecutionDoneRequest),
    V0JobFinishedRequest(V0JobFinishedRequest),
    V0JobFailedRequest(V0JobFailedRequest),
    V0HordeFailedRequest(V0HordeFailedRequest),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_volume_type_fails_to_deserialize() {
        let raw = r#"{"volume_type": "not_a_real_kind"}"#;
        let result: Result<Volume, _> = serde_json::from_str(raw);
        assert!(result.is_err(), "unknown volume_type must not deserialize silently");
    }

    #[test]
    fn inline_volume_round_trips() {
        let raw = r#"{"volume_type": "inline", "contents": "UEsDBA=="}"#;
        let vol: Volume = serde_json::from_str(raw).unwrap();
        assert_eq!(
            vol,
            Volume::Inline {
                contents: "UEsDBA==".to_string()
            }
        );
    }

    #[test]
    fn outbound_message_is_tagged_by_message_type() {
        let msg = OutboundMessage::V0VolumesReadyRequest(V0VolumesReadyRequest {
            job_uuid: JobId(uuid::Uuid::nil()),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["message_type"], "V0VolumesReadyRequest");
        assert_eq!(json["job_uuid"], "00000000-0000-0000-0000-000000000000");
    }
}
