//! Error type for `rollout-store-sqlite`.

use rollout_core::store::RepositoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] rollout_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("deployment not found: market {market:?}, deployment {deployment_id:?}")]
  DeploymentNotFound {
    market:        String,
    deployment_id: String,
  },

  #[error("workflow not found: {0}")]
  WorkflowNotFound(String),

  /// The stored ETag no longer matches the one the caller read.
  #[error("stale write on {0}: document was modified concurrently")]
  StaleWrite(String),
}

impl RepositoryError for Error {
  fn is_stale_write(&self) -> bool {
    match self {
      Self::StaleWrite(_) => true,
      Self::Core(e) => e.is_stale_write(),
      _ => false,
    }
  }

  fn is_not_found(&self) -> bool {
    matches!(
      self,
      Self::DeploymentNotFound { .. }
        | Self::WorkflowNotFound(_)
        | Self::Core(rollout_core::Error::DeploymentNotFound { .. })
        | Self::Core(rollout_core::Error::WorkflowNotFound(_))
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
