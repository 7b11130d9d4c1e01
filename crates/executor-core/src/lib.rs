#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared protocol, error taxonomy, and timing primitives for the job driver.
//!
//! This crate has no async runtime dependency of its own beyond `chrono` for
//! timestamps; it is consumed by both `executor-driver` (the state machine)
//! and `executor-runner` (the container/volume/upload backends) so that
//! neither has to depend on the other for wire-format or failure types.

pub mod contracts;
pub mod errors;
pub mod protocol;
pub mod stage;
pub mod timer;

pub use contracts::{CoordinatorClient, JobRunner};
pub use errors::{FailureContext, HordeError, HordeFailureReason, JobError, JobFailureReason};
pub use stage::JobStage;
pub use timer::DeadlineTimer;

/// Opaque correlation identifier supplied by the coordinator at job start.
///
/// Wraps a UUID rather than a bare `Uuid` so that the wire encoding (a
/// string) and the in-process identity share one type with one `Display`/
/// `serde` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct JobId(pub uuid::Uuid);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}
