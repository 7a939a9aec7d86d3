//! # Job Cancellation
//!
//! Aborts every running attempt of a logical job. A job is aborted by forcing
//! `spec.parallelism` to zero, which makes the Job controller delete its pods,
//! and then stamping `status.completionTime`. Kubernetes only accepts these as
//! two patches against two sub-resources, so each abort is a two-step
//! transition:
//!
//! ```text
//! Active --SpecPatch--> Aborting --StatusPatch--> Aborted
//! ```
//!
//! Jobs that already succeeded or were already aborted are left alone. Both
//! patches carry the `resourceVersion` they were computed from; when the job
//! changed underneath us (typically because it just finished) the API server
//! answers with a conflict and the job is re-read and re-classified before
//! another attempt.

use crate::client::{ClientError, JobClient};
use crate::descriptor::{TriggerContext, ANNOTATION_DESCRIPTION, ANNOTATION_STATE, STATE_ABORTED};
use crate::error::{CancelStage, Error, Result};
use crate::status::merge_annotations;
use k8s_openapi::api::batch::v1::{Job, JobSpec, JobStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const ABORTED_DESCRIPTION: &str = "Build aborted.";

/// Lifecycle classification of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Active,
    /// `spec.parallelism` is present and zero, and nothing succeeded
    Aborted,
    /// `status.succeeded` is above zero
    Succeeded,
}

impl JobState {
    #[must_use]
    pub fn of(job: &Job) -> Self {
        let parallelism = job.spec.as_ref().and_then(|s| s.parallelism);
        let succeeded = job
            .status
            .as_ref()
            .and_then(|s| s.succeeded)
            .unwrap_or(0);

        // A job that finished keeps counting as succeeded even if its
        // parallelism was zeroed afterwards.
        if succeeded > 0 {
            Self::Succeeded
        } else if parallelism == Some(0) {
            Self::Aborted
        } else {
            Self::Active
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// The two halves of an abort, in the order they are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortStep {
    /// `spec.parallelism = 0` plus the aborted annotations
    SpecPatch,
    /// `status.completionTime = now`
    StatusPatch,
}

impl fmt::Display for AbortStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpecPatch => f.write_str("spec patch"),
            Self::StatusPatch => f.write_str("status patch"),
        }
    }
}

/// Retry knobs for conflicting aborts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPolicy {
    /// Patch attempts per job, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause before re-reading a conflicting job
    #[serde(default)]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for CancelPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
        }
    }
}

impl CancelPolicy {
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CancelReport {
    /// Jobs carrying the logical job's labels
    pub matched: usize,
    /// Jobs this call aborted
    pub aborted: usize,
    /// Jobs that were already aborted or had already succeeded
    pub skipped: usize,
}

enum Outcome {
    Aborted,
    Skipped,
}

pub struct JobCanceller {
    client: Arc<dyn JobClient>,
    policy: CancelPolicy,
}

impl JobCanceller {
    #[must_use]
    pub fn new(client: Arc<dyn JobClient>) -> Self {
        Self {
            client,
            policy: CancelPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: CancelPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Abort every attempt of `job_name` for this trigger.
    ///
    /// Jobs are handled one at a time and the first unrecoverable error stops
    /// the whole operation. No matching jobs is success.
    #[instrument(skip(self, ctx), fields(owner = %ctx.owner, repo = %ctx.repo, pr = ctx.number))]
    pub async fn cancel(&self, ctx: &TriggerContext, job_name: &str) -> Result<CancelReport> {
        let selector = ctx.selector(job_name);
        let jobs = self
            .client
            .list_jobs(&selector)
            .await
            .map_err(|source| Error::Cancel {
                job: job_name.to_string(),
                step: CancelStage::List,
                source,
            })?;

        let mut report = CancelReport {
            matched: jobs.len(),
            ..CancelReport::default()
        };
        if jobs.is_empty() {
            debug!(job_name = %job_name, "No jobs to cancel");
            return Ok(report);
        }

        for job in jobs {
            match self.cancel_job(job).await? {
                Outcome::Aborted => report.aborted += 1,
                Outcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            job_name = %job_name,
            matched = report.matched,
            aborted = report.aborted,
            skipped = report.skipped,
            "Cancel completed"
        );
        Ok(report)
    }

    async fn cancel_job(&self, mut job: Job) -> Result<Outcome> {
        let name = job.name_any();
        let max_attempts = self.policy.max_attempts.max(1);
        // Set once our spec patch has landed, so a re-read job showing
        // parallelism 0 is recognized as our own half-finished abort.
        let mut spec_applied = false;

        for attempt in 1..=max_attempts {
            let from = match JobState::of(&job) {
                JobState::Succeeded => {
                    debug!(job = %name, "Job already succeeded, leaving it alone");
                    return Ok(Outcome::Skipped);
                }
                JobState::Aborted if !spec_applied => {
                    debug!(job = %name, "Job already aborted");
                    return Ok(Outcome::Skipped);
                }
                JobState::Aborted => AbortStep::StatusPatch,
                JobState::Active => AbortStep::SpecPatch,
            };

            let (step, source) = match self.abort(&name, &job, from).await {
                Ok(()) => {
                    info!(job = %name, attempt, "Aborted job");
                    return Ok(Outcome::Aborted);
                }
                Err(failure) => failure,
            };
            if step == AbortStep::StatusPatch {
                spec_applied = true;
            }
            if !source.is_conflict() {
                return Err(Error::Cancel {
                    job: name,
                    step: CancelStage::Abort(step),
                    source,
                });
            }

            warn!(job = %name, attempt, step = %step, "Job changed while aborting it");
            if attempt == max_attempts {
                break;
            }
            if !self.policy.backoff().is_zero() {
                tokio::time::sleep(self.policy.backoff()).await;
            }
            job = self
                .client
                .get_job(&name)
                .await
                .map_err(|source| Error::Cancel {
                    job: name.clone(),
                    step: CancelStage::Refetch,
                    source,
                })?;
        }

        Err(Error::RetriesExhausted {
            job: name,
            attempts: max_attempts,
        })
    }

    /// Run the abort transition starting at `from`.
    async fn abort(
        &self,
        name: &str,
        job: &Job,
        from: AbortStep,
    ) -> Result<(), (AbortStep, ClientError)> {
        let mut resource_version = job.metadata.resource_version.clone();

        if from == AbortStep::SpecPatch {
            let patch = Job {
                metadata: ObjectMeta {
                    annotations: Some(merge_annotations(
                        job,
                        &[
                            (ANNOTATION_STATE, STATE_ABORTED),
                            (ANNOTATION_DESCRIPTION, ABORTED_DESCRIPTION),
                        ],
                    )),
                    resource_version: resource_version.clone(),
                    ..Default::default()
                },
                spec: Some(JobSpec {
                    parallelism: Some(0),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let patched = self
                .client
                .patch_job_metadata(name, &patch)
                .await
                .map_err(|e| (AbortStep::SpecPatch, e))?;
            resource_version = patched.metadata.resource_version;
        }

        let patch = Job {
            metadata: ObjectMeta {
                resource_version,
                ..Default::default()
            },
            status: Some(JobStatus {
                completion_time: Some(Time(chrono::Utc::now())),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.client
            .patch_job_status(name, &patch)
            .await
            .map_err(|e| (AbortStep::StatusPatch, e))?;
        Ok(())
    }
}
