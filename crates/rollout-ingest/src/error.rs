//! Error types for the ingest host and their HTTP rendering.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use rollout_core::store::RepositoryError;
use serde_json::json;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error returned by an HTTP handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("precondition failed: {0}")]
  PreconditionFailed(String),

  #[error("store error: {0}")]
  Store(#[source] BoxError),
}

impl ApiError {
  /// Classify a repository failure.
  pub fn store<E: RepositoryError>(e: E) -> Self {
    if e.is_stale_write() {
      Self::PreconditionFailed(e.to_string())
    } else if e.is_not_found() {
      Self::NotFound(e.to_string())
    } else {
      Self::Store(Box::new(e))
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::PreconditionFailed(m) => (StatusCode::PRECONDITION_FAILED, m.clone()),
      ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}

/// Why processing one inbound event failed.
#[derive(Debug, Error)]
pub enum ProcessError {
  #[error(transparent)]
  Core(#[from] rollout_core::Error),

  /// The document changed under us; the whole cycle may be retried.
  #[error("stale write: {0}")]
  Stale(#[source] BoxError),

  #[error("store error: {0}")]
  Store(#[source] BoxError),
}

impl ProcessError {
  pub fn from_repository<E: RepositoryError>(e: E) -> Self {
    if e.is_stale_write() {
      Self::Stale(Box::new(e))
    } else {
      Self::Store(Box::new(e))
    }
  }

  /// Errors no retry can fix: the event itself is bad or targets nothing.
  pub fn is_rejection(&self) -> bool {
    use rollout_core::Error as E;
    matches!(
      self,
      Self::Core(
        E::MalformedEvent(_)
          | E::UnknownStatus(_)
          | E::DeploymentNotFound { .. }
          | E::StoreNotFound { .. }
          | E::WorkflowNotFound(_)
          | E::WorkflowStepNotFound { .. }
      )
    )
  }
}
