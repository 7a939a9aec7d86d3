//! Error types for job lifecycle operations.

use crate::cancel::AbortStep;
use crate::client::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unparseable required input. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Orchestrator error surfaced verbatim.
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to render job: {0}")]
    Render(#[from] serde_json::Error),

    #[error("Cancel of job {job} failed during {step}: {source}")]
    Cancel {
        job: String,
        step: CancelStage,
        #[source]
        source: ClientError,
    },

    #[error("Cancel of job {job} gave up after {attempts} conflicting attempts")]
    RetriesExhausted { job: String, attempts: u32 },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Where in the cancel protocol a client call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStage {
    List,
    Refetch,
    Abort(AbortStep),
}

impl std::fmt::Display for CancelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Refetch => f.write_str("re-fetch"),
            Self::Abort(step) => write!(f, "{step}"),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
