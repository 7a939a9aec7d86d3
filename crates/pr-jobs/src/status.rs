//! Status reporting through job annotations.

use crate::client::JobClient;
use crate::descriptor::{ANNOTATION_DESCRIPTION, ANNOTATION_STATE, ANNOTATION_URL};
use crate::error::Result;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Copy of `job`'s annotations with `updates` applied on top.
#[must_use]
pub fn merge_annotations(job: &Job, updates: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut annotations = job.metadata.annotations.clone().unwrap_or_default();
    for (key, value) in updates {
        annotations.insert((*key).to_string(), (*value).to_string());
    }
    annotations
}

/// Publishes build progress on a job's `state`, `description` and `url`
/// annotations for status-check reporters to pick up.
pub struct StatusReporter {
    client: Arc<dyn JobClient>,
}

impl StatusReporter {
    #[must_use]
    pub fn new(client: Arc<dyn JobClient>) -> Self {
        Self { client }
    }

    /// Best effort, no retry: repeating a call with the same values is harmless.
    #[instrument(skip(self, description, url), fields(job = %job_name))]
    pub async fn set_status(
        &self,
        job_name: &str,
        state: &str,
        description: &str,
        url: &str,
    ) -> Result<Job> {
        let job = self.client.get_job(job_name).await?;
        let annotations = merge_annotations(
            &job,
            &[
                (ANNOTATION_STATE, state),
                (ANNOTATION_DESCRIPTION, description),
                (ANNOTATION_URL, url),
            ],
        );

        let patch = Job {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };
        let updated = self.client.patch_job_metadata(job_name, &patch).await?;
        info!(state = %state, "Updated job status");
        Ok(updated)
    }
}
