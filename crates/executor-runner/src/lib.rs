#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Concrete [`JobRunner`](executor_core::JobRunner) backed by the Docker
//! Engine API, plain HTTP for volumes/uploads, and local host introspection
//! for machine specs.
//!
//! This crate knows nothing about the coordinator, deadlines, or the stage
//! sequence — it only knows how to do each step once asked. Ordering and
//! timing are the driver's job.

mod artifacts;
mod container;
mod fsutil;
mod runner;
mod specs;
mod upload;
mod volume;

pub use runner::{DockerJobRunner, DockerRunnerConfig};
