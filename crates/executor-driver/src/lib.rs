#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The job driver: the per-invocation control core that runs one job
//! through `executor_startup -> volume_download -> execution ->
//! result_upload`, owning the deadline and the failure taxonomy, and
//! delegating every actual side effect to a [`JobRunner`] and a
//! [`CoordinatorClient`].

mod driver;
mod failure_sink;
mod security;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use driver::{DriverOutcome, JobDriver};
pub use failure_sink::{FailureSink, NoopFailureSink};
pub use security::{SecurityCheck, SecurityGate, SecurityGateConfig};

pub use executor_core::{CoordinatorClient, JobRunner};
