use serde::{Deserialize, Serialize};

/// Current stage of the driver's single linear pass.
///
/// Transitions are strictly forward: `Unknown -> ExecutorStartup ->
/// VolumeDownload -> Execution -> ResultUpload`. Any stage may terminate
/// into failure; there are no reverse transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Unknown,
    ExecutorStartup,
    VolumeDownload,
    Execution,
    ResultUpload,
}

impl Default for JobStage {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStage::Unknown => "unknown",
            JobStage::ExecutorStartup => "executor_startup",
            JobStage::VolumeDownload => "volume_download",
            JobStage::Execution => "execution",
            JobStage::ResultUpload => "result_upload",
        };
        f.write_str(s)
    }
}
