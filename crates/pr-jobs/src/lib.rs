#![allow(clippy::missing_errors_doc, clippy::doc_markdown)]

//! Pull-request build jobs on Kubernetes
//!
//! Launches one `batch/v1` Job per build attempt, cancels running attempts
//! without clobbering jobs that already finished, and publishes build status
//! on job annotations.

pub mod cancel;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod launcher;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::{CancelPolicy, CancelReport, JobCanceller, JobState};
pub use client::{ClientError, JobClient, KubeJobClient};
pub use config::JobConfig;
pub use descriptor::{JobDescriptor, LaunchSettings, TriggerContext};
pub use error::{Error, Result};
pub use launcher::JobLauncher;
pub use status::StatusReporter;
