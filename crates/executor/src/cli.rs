use clap::Parser;

fn default_log_directive() -> String {
    std::env::var("EXECUTOR_LOG").unwrap_or_else(|_| "info".to_string())
}

/// One process, one job: the executor reads its coordinator endpoint and
/// job identity from the environment (or flags), runs the job driver to
/// completion, then exits.
#[derive(Debug, Clone, Parser)]
#[command(name = "executor", version, about = "Horde job executor")]
pub struct Cli {
    /// WebSocket URL of the coordinator connection opened for this job.
    #[arg(long, env = "EXECUTOR_COORDINATOR_URL")]
    pub coordinator_url: String,

    /// Job identifier, known before the coordinator sends the initial
    /// message (the transport is opened per-job, not multiplexed).
    #[arg(long, env = "EXECUTOR_JOB_UUID")]
    pub job_uuid: uuid::Uuid,

    /// Seconds allotted to the startup stage (security gate + initial
    /// message + machine-specs capture) before a horde-level timeout.
    #[arg(long, env = "EXECUTOR_STARTUP_TIME_LIMIT", default_value_t = 60.0)]
    pub startup_time_limit: f64,

    /// Skips machine-specs capture and the NVIDIA Container Toolkit probe —
    /// for hosts with no GPU and no NVIDIA Container Toolkit installed.
    #[arg(long, env = "DEBUG_NO_GPU_MODE", default_value_t = false)]
    pub debug_no_gpu_mode: bool,

    /// Hard cap on a downloaded input volume, in bytes.
    #[arg(long, env = "VOLUME_MAX_SIZE_BYTES", default_value_t = 50 * 1024 * 1024 * 1024)]
    pub volume_max_size_bytes: u64,

    /// Hard cap on a single harvested artifact file, in bytes.
    #[arg(long, env = "EXECUTOR_MAX_ARTIFACT_FILE_BYTES", default_value_t = 1024 * 1024 * 1024)]
    pub max_artifact_file_bytes: u64,

    /// How many times an output upload is retried before giving up.
    #[arg(long, env = "EXECUTOR_UPLOAD_MAX_ATTEMPTS", default_value_t = 3)]
    pub upload_max_attempts: u32,

    /// Overrides the published minimum safe NVIDIA Container Toolkit version.
    #[arg(long, env = "EXECUTOR_NVIDIA_TOOLKIT_MIN_VERSION")]
    pub nvidia_toolkit_min_version: Option<semver::Version>,

    /// `tracing_subscriber::EnvFilter` directive. Defaults to `EXECUTOR_LOG`
    /// (itself defaulting to `info`) so the flag and the bare env var both work.
    #[arg(long, default_value_t = default_log_directive())]
    pub log: String,
}
