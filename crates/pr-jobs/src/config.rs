//! Launcher Configuration
//!
//! Settings normally come from a mounted YAML file; the environment
//! (`LINE_IMAGE`, `DRY_RUN`, `JOB_NAMESPACE`) is the fallback.

use crate::cancel::CancelPolicy;
use crate::descriptor::{default_volumes, parse_bool, EndpointBinding, LaunchSettings, MountedVolume};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const IMAGE_ENV: &str = "LINE_IMAGE";
pub const DRY_RUN_ENV: &str = "DRY_RUN";
pub const NAMESPACE_ENV: &str = "JOB_NAMESPACE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Namespace the build jobs live in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Build container image
    #[serde(default)]
    pub image: String,

    /// Passed through to the build as `--dry-run`
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub endpoint: EndpointBinding,

    #[serde(default = "default_volumes")]
    pub volumes: Vec<MountedVolume>,

    #[serde(default)]
    pub cancel: CancelPolicy,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            image: String::new(),
            dry_run: false,
            endpoint: EndpointBinding::default(),
            volumes: default_volumes(),
            cancel: CancelPolicy::default(),
        }
    }
}

impl JobConfig {
    pub fn from_mounted_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::config(format!("invalid config: {e}")))
    }

    /// Both `LINE_IMAGE` and `DRY_RUN` must be set.
    pub fn from_env() -> Result<Self> {
        let image = std::env::var(IMAGE_ENV)
            .map_err(|_| Error::config(format!("{IMAGE_ENV} not set")))?;
        let raw_dry_run = std::env::var(DRY_RUN_ENV).unwrap_or_default();
        let dry_run = parse_bool(&raw_dry_run)
            .ok_or_else(|| Error::config(format!("{DRY_RUN_ENV} not parseable: {raw_dry_run:?}")))?;
        Ok(Self {
            image,
            dry_run,
            ..Self::namespace_from_env()
        })
    }

    /// Defaults with only the namespace taken from `JOB_NAMESPACE`, for
    /// operations that never build a job.
    #[must_use]
    pub fn namespace_from_env() -> Self {
        let namespace = std::env::var(NAMESPACE_ENV)
            .ok()
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or_else(default_namespace);
        Self {
            namespace,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(Error::config("image is required"));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace is required"));
        }
        if self.endpoint.env_var.trim().is_empty() {
            return Err(Error::config("endpoint.envVar is required"));
        }
        Ok(())
    }

    #[must_use]
    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            image: self.image.clone(),
            dry_run: self.dry_run,
            endpoint: self.endpoint.clone(),
            volumes: self.volumes.clone(),
        }
    }
}
