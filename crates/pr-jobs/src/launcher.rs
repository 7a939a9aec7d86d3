//! Job submission.

use crate::client::JobClient;
use crate::descriptor::{IdGenerator, JobDescriptor, LaunchSettings, TriggerContext, UuidGenerator};
use crate::error::Result;
use k8s_openapi::api::batch::v1::Job;
use std::sync::Arc;
use tracing::{error, info, instrument};

pub struct JobLauncher {
    client: Arc<dyn JobClient>,
    ids: Arc<dyn IdGenerator>,
}

impl JobLauncher {
    #[must_use]
    pub fn new(client: Arc<dyn JobClient>) -> Self {
        Self {
            client,
            ids: Arc::new(UuidGenerator),
        }
    }

    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Build a fresh descriptor and submit it exactly once.
    ///
    /// A failed create is returned as-is. Retrying would mint a new identity
    /// and could leave two attempts running for the same trigger.
    #[instrument(skip(self, ctx, settings), fields(owner = %ctx.owner, repo = %ctx.repo, pr = ctx.number))]
    pub async fn launch(
        &self,
        ctx: &TriggerContext,
        job_name: &str,
        settings: &LaunchSettings,
    ) -> Result<Job> {
        let descriptor = JobDescriptor::build(ctx, job_name, settings, self.ids.as_ref())?;
        let job = descriptor.to_job()?;

        match self.client.create_job(&job).await {
            Ok(created) => {
                info!(job = %descriptor.identity, image = %settings.image, "Created build job");
                Ok(created)
            }
            Err(e) => {
                error!(job = %descriptor.identity, error = %e, "Failed to create build job");
                Err(e.into())
            }
        }
    }
}
