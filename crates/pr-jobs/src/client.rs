//! # Orchestrator Client
//!
//! The narrow slice of the Kubernetes Job API the lifecycle operations need,
//! plus a kube-rs backed implementation for a single namespace.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Error as KubeError, ResourceExt};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Optimistic-concurrency rejection: the record changed since it was read.
    #[error("Conflict updating job {job}: {message}")]
    Conflict { job: String, message: String },

    #[error("Job {job} not found")]
    NotFound { job: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] KubeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    fn from_kube(job: &str, err: KubeError) -> Self {
        match err {
            KubeError::Api(ae) if ae.code == 409 => Self::Conflict {
                job: job.to_string(),
                message: ae.message,
            },
            KubeError::Api(ae) if ae.code == 404 => Self::NotFound {
                job: job.to_string(),
            },
            other => Self::Kube(other),
        }
    }
}

/// Job lifecycle requests against the orchestrator.
///
/// Patch calls take a partial `Job`; only the populated fields are merged.
#[async_trait]
pub trait JobClient: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<Job, ClientError>;

    async fn list_jobs(&self, selector: &BTreeMap<String, String>)
        -> Result<Vec<Job>, ClientError>;

    async fn get_job(&self, name: &str) -> Result<Job, ClientError>;

    /// Merge `patch` into the main resource (metadata and spec).
    async fn patch_job_metadata(&self, name: &str, patch: &Job) -> Result<Job, ClientError>;

    /// Merge `patch` into the status sub-resource.
    async fn patch_job_status(&self, name: &str, patch: &Job) -> Result<Job, ClientError>;
}

/// Render a label map as a Kubernetes equality selector (`k=v,k=v`).
#[must_use]
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// [`JobClient`] backed by `kube::Api<Job>`.
#[derive(Clone)]
pub struct KubeJobClient {
    jobs: Api<Job>,
}

impl KubeJobClient {
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            jobs: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl JobClient for KubeJobClient {
    async fn create_job(&self, job: &Job) -> Result<Job, ClientError> {
        let name = job.name_any();
        self.jobs
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| ClientError::from_kube(&name, e))
    }

    async fn list_jobs(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Job>, ClientError> {
        let selector = label_selector(selector);
        debug!(selector = %selector, "Listing jobs");
        let list = self
            .jobs
            .list(&ListParams::default().labels(&selector))
            .await?;
        Ok(list.items)
    }

    async fn get_job(&self, name: &str) -> Result<Job, ClientError> {
        self.jobs
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(name, e))
    }

    async fn patch_job_metadata(&self, name: &str, patch: &Job) -> Result<Job, ClientError> {
        let body = serde_json::to_value(patch)?;
        self.jobs
            .patch(name, &PatchParams::default(), &Patch::Merge(&body))
            .await
            .map_err(|e| ClientError::from_kube(name, e))
    }

    async fn patch_job_status(&self, name: &str, patch: &Job) -> Result<Job, ClientError> {
        let body = serde_json::to_value(patch)?;
        self.jobs
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&body))
            .await
            .map_err(|e| ClientError::from_kube(name, e))
    }
}
