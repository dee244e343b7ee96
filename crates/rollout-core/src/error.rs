//! Error types for `rollout-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("deployment not found: market {market:?}, deployment {deployment_id:?}")]
  DeploymentNotFound {
    market:        String,
    deployment_id: String,
  },

  #[error("store {store_id:?} is not part of deployment {deployment_id:?}")]
  StoreNotFound {
    deployment_id: String,
    store_id:      String,
  },

  #[error("workflow not found: {0}")]
  WorkflowNotFound(String),

  #[error("workflow {workflow_id:?} has no step named {step:?}")]
  WorkflowStepNotFound { workflow_id: String, step: String },

  #[error("malformed event: {0}")]
  MalformedEvent(String),

  #[error("stale write on document {0}")]
  StaleWrite(String),

  #[error("device roster unavailable for store {store_id:?}: {reason}")]
  RosterUnavailable { store_id: String, reason: String },

  #[error("unknown status: {0:?}")]
  UnknownStatus(String),

  #[error("invalid patch at {path:?}: {reason}")]
  InvalidPatch { path: String, reason: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether retrying the read-compute-write cycle could succeed.
  pub fn is_stale_write(&self) -> bool { matches!(self, Self::StaleWrite(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
