//! Error-reporting sink invoked on the driver's catch-all failure path.
//!
//! Stands in for the error-tracking capture call the original control loop
//! made when it caught an exception outside the known taxonomy; kept as an
//! interface so a production binary can plug in whatever reporting service
//! it uses without the driver depending on it directly.

/// Reports an unanticipated failure somewhere that isn't the normal
/// job-failed / horde-failed wire path — typically before it's wrapped into
/// a [`executor_core::HordeError`].
pub trait FailureSink: Send + Sync {
    fn capture(&self, stage: executor_core::JobStage, error: &(dyn std::error::Error + 'static));
}

/// Default sink: logs at error level and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFailureSink;

impl FailureSink for NoopFailureSink {
    fn capture(&self, stage: executor_core::JobStage, error: &(dyn std::error::Error + 'static)) {
        tracing::error!(%stage, %error, "unhandled error captured");
    }
}
