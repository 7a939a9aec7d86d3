//! # Job Descriptor Builder
//!
//! Maps a pull-request trigger onto the `batch/v1` Job that runs its build.
//! Construction is pure apart from drawing a fresh identity per descriptor.

use crate::error::{Error, Result};
use k8s_openapi::api::batch::v1::Job;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Jobs still running after this long are killed by the orchestrator.
pub const JOB_DEADLINE: Duration = Duration::from_secs(10 * 60 * 60);

pub const LABEL_OWNER: &str = "owner";
pub const LABEL_REPO: &str = "repo";
pub const LABEL_PR: &str = "pr";
pub const LABEL_JOB_NAME: &str = "job-name";

pub const ANNOTATION_STATE: &str = "state";
pub const ANNOTATION_AUTHOR: &str = "author";
pub const ANNOTATION_DESCRIPTION: &str = "description";
pub const ANNOTATION_URL: &str = "url";
pub const ANNOTATION_BASE_REF: &str = "base-ref";
pub const ANNOTATION_BASE_SHA: &str = "base-sha";
pub const ANNOTATION_PULL_SHA: &str = "pull-sha";

pub const STATE_TRIGGERED: &str = "triggered";
pub const STATE_ABORTED: &str = "aborted";

const CONTAINER_NAME: &str = "build";

/// The code-review event that caused a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerContext {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub base_ref: String,
    pub base_sha: String,
    pub head_sha: String,
    pub author: String,
}

impl TriggerContext {
    /// Labels identifying the logical job `job_name` for this trigger.
    ///
    /// Every physical attempt of the same build carries the same selector.
    #[must_use]
    pub fn selector(&self, job_name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_OWNER.to_string(), self.owner.clone()),
            (LABEL_REPO.to_string(), self.repo.clone()),
            (LABEL_PR.to_string(), self.number.to_string()),
            (LABEL_JOB_NAME.to_string(), job_name.to_string()),
        ])
    }
}

/// Source of process-unique job identities.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Environment binding that hands the build its orchestrator endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointBinding {
    /// Environment variable set inside the container
    pub env_var: String,
    /// ConfigMap holding the address
    pub config_map: String,
    pub key: String,
    /// Container flag that receives `$(env_var)`
    pub arg: String,
}

impl Default for EndpointBinding {
    fn default() -> Self {
        Self {
            env_var: "JENKINS_URL".to_string(),
            config_map: "jenkins-address".to_string(),
            key: "jenkins-address".to_string(),
            arg: "jenkins-url".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum VolumeSource {
    Secret { name: String },
    ConfigMap { name: String },
    /// The pod's own labels, exposed as a file named `labels`
    DownwardLabels,
}

/// A read-only volume mounted into the build container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountedVolume {
    pub name: String,
    pub mount_path: String,
    pub source: VolumeSource,
}

impl MountedVolume {
    fn new(name: &str, mount_path: &str, source: VolumeSource) -> Self {
        Self {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            source,
        }
    }

    fn volume_json(&self) -> serde_json::Value {
        match &self.source {
            VolumeSource::Secret { name } => json!({
                "name": self.name,
                "secret": { "secretName": name }
            }),
            VolumeSource::ConfigMap { name } => json!({
                "name": self.name,
                "configMap": { "name": name }
            }),
            VolumeSource::DownwardLabels => json!({
                "name": self.name,
                "downwardAPI": {
                    "items": [{
                        "path": "labels",
                        "fieldRef": { "fieldPath": "metadata.labels" }
                    }]
                }
            }),
        }
    }
}

/// Credentials, label file and job configs every build container mounts.
#[must_use]
pub fn default_volumes() -> Vec<MountedVolume> {
    vec![
        MountedVolume::new(
            "oauth",
            "/etc/github",
            VolumeSource::Secret {
                name: "oauth-token".to_string(),
            },
        ),
        MountedVolume::new(
            "jenkins",
            "/etc/jenkins",
            VolumeSource::Secret {
                name: "jenkins-token".to_string(),
            },
        ),
        MountedVolume::new("labels", "/etc/labels", VolumeSource::DownwardLabels),
        MountedVolume::new(
            "job-configs",
            "/etc/jobs",
            VolumeSource::ConfigMap {
                name: "job-configs".to_string(),
            },
        ),
    ]
}

/// Caller-supplied configuration for building descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub image: String,
    pub dry_run: bool,
    pub endpoint: EndpointBinding,
    pub volumes: Vec<MountedVolume>,
}

impl LaunchSettings {
    #[must_use]
    pub fn new(image: impl Into<String>, dry_run: bool) -> Self {
        Self {
            image: image.into(),
            dry_run,
            endpoint: EndpointBinding::default(),
            volumes: default_volumes(),
        }
    }

    /// Build settings from their external (string) representation.
    pub fn parse(image: &str, dry_run: &str) -> Result<Self> {
        if image.trim().is_empty() {
            return Err(Error::config("image reference is not set"));
        }
        let dry_run = parse_bool(dry_run)
            .ok_or_else(|| Error::config(format!("dry-run flag {dry_run:?} is not a boolean")))?;
        Ok(Self::new(image, dry_run))
    }
}

/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub args: Vec<String>,
    pub volumes: Vec<MountedVolume>,
    pub endpoint: EndpointBinding,
}

/// Everything submitted to create one build attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub identity: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub deadline: Duration,
    pub container: ContainerSpec,
}

impl JobDescriptor {
    /// Build the descriptor for one attempt of `job_name` on `ctx`.
    ///
    /// Only an empty image reference is rejected; labels and annotations come
    /// straight from the trigger.
    pub fn build(
        ctx: &TriggerContext,
        job_name: &str,
        settings: &LaunchSettings,
        ids: &dyn IdGenerator,
    ) -> Result<Self> {
        if settings.image.trim().is_empty() {
            return Err(Error::config("image reference is not set"));
        }

        let annotations = BTreeMap::from([
            (ANNOTATION_STATE.to_string(), STATE_TRIGGERED.to_string()),
            (ANNOTATION_AUTHOR.to_string(), ctx.author.clone()),
            (
                ANNOTATION_DESCRIPTION.to_string(),
                "Build triggered.".to_string(),
            ),
            (ANNOTATION_URL.to_string(), String::new()),
            (ANNOTATION_BASE_REF.to_string(), ctx.base_ref.clone()),
            (ANNOTATION_BASE_SHA.to_string(), ctx.base_sha.clone()),
            (ANNOTATION_PULL_SHA.to_string(), ctx.head_sha.clone()),
        ]);

        let args = vec![
            format!("--job-name={job_name}"),
            format!("--repo-owner={}", ctx.owner),
            format!("--repo-name={}", ctx.repo),
            format!("--pr={}", ctx.number),
            format!("--base-ref={}", ctx.base_ref),
            format!("--base-sha={}", ctx.base_sha),
            format!("--pull-sha={}", ctx.head_sha),
            format!("--dry-run={}", settings.dry_run),
            format!(
                "--{}=$({})",
                settings.endpoint.arg, settings.endpoint.env_var
            ),
        ];

        Ok(Self {
            identity: ids.next_id(),
            labels: ctx.selector(job_name),
            annotations,
            deadline: JOB_DEADLINE,
            container: ContainerSpec {
                image: settings.image.clone(),
                args,
                volumes: settings.volumes.clone(),
                endpoint: settings.endpoint.clone(),
            },
        })
    }

    /// Render as a Kubernetes Job.
    pub fn to_job(&self) -> Result<Job> {
        let container = &self.container;
        let volume_mounts: Vec<_> = container
            .volumes
            .iter()
            .map(|v| {
                json!({
                    "name": v.name,
                    "mountPath": v.mount_path,
                    "readOnly": true
                })
            })
            .collect();
        let volumes: Vec<_> = container
            .volumes
            .iter()
            .map(MountedVolume::volume_json)
            .collect();

        let job = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": self.identity,
                "labels": self.labels,
                "annotations": self.annotations
            },
            "spec": {
                "activeDeadlineSeconds": self.deadline.as_secs(),
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": CONTAINER_NAME,
                            "image": container.image,
                            "args": container.args,
                            "volumeMounts": volume_mounts,
                            "env": [{
                                "name": container.endpoint.env_var,
                                "valueFrom": {
                                    "configMapKeyRef": {
                                        "name": container.endpoint.config_map,
                                        "key": container.endpoint.key
                                    }
                                }
                            }]
                        }],
                        "volumes": volumes
                    }
                }
            }
        });

        Ok(serde_json::from_value(job)?)
    }
}
