//! Handlers for `/workflows/{id}`.

use axum::{
  Json,
  extract::{Path, State},
  http::{HeaderMap, StatusCode, header},
  response::IntoResponse,
};
use rollout_core::{roster::RosterSource, store::DeploymentRepository, workflow::Workflow};

use crate::{AppState, error::ApiError, if_match, precondition_holds};

/// `GET /workflows/{id}`
pub async fn get_one<S, R>(
  State(state): State<AppState<S, R>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
  S: DeploymentRepository,
  R: RosterSource,
{
  let found = state
    .store
    .find_workflow(&id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("workflow {id} not found")))?;
  Ok(([(header::ETAG, found.etag)], Json(found.document)))
}

/// `PUT /workflows/{id}` — body: a workflow document. An empty body `id`
/// takes the path's.
pub async fn put_one<S, R>(
  State(state): State<AppState<S, R>>,
  Path(id): Path<String>,
  headers: HeaderMap,
  Json(mut workflow): Json<Workflow>,
) -> Result<impl IntoResponse, ApiError>
where
  S: DeploymentRepository,
  R: RosterSource,
{
  if workflow.id.is_empty() {
    workflow.id = id.clone();
  } else if workflow.id != id {
    return Err(ApiError::BadRequest(format!(
      "body addresses workflow {}, path addresses {id}",
      workflow.id
    )));
  }

  let current = state.store.find_workflow(&id).await.map_err(ApiError::store)?;
  let current_etag = current.as_ref().map(|v| v.etag.as_str());
  if !precondition_holds(if_match(&headers), current_etag) {
    return Err(ApiError::PreconditionFailed(format!("workflow {id} has changed")));
  }

  let stored = match current_etag {
    Some(etag) => state.store.replace_workflow(workflow, etag).await,
    None => state.store.put_workflow(workflow).await,
  }
  .map_err(ApiError::store)?;
  let status = if current.is_some() { StatusCode::OK } else { StatusCode::CREATED };
  Ok((status, [(header::ETAG, stored.etag)], Json(stored.document)))
}
