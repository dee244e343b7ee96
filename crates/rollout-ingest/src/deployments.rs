//! Handlers for `/deployments/{market}/{deployment_id}`.
//!
//! `PUT` stores a whole document as written by the scheduling side of the
//! pipeline; the derived `detailedStatus` is recomputed on the way in.

use axum::{
  Json,
  extract::{Path, State},
  http::{HeaderMap, StatusCode, header},
  response::IntoResponse,
};
use rollout_core::{deployment::Deployment, roster::RosterSource, store::DeploymentRepository};

use crate::{AppState, error::ApiError, if_match, precondition_holds};

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /deployments/{market}/{deployment_id}`
pub async fn get_one<S, R>(
  State(state): State<AppState<S, R>>,
  Path((market, deployment_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError>
where
  S: DeploymentRepository,
  R: RosterSource,
{
  let found = state
    .store
    .find_deployment(&market, &deployment_id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("deployment {market}/{deployment_id} not found")))?;
  Ok(([(header::ETAG, found.etag)], Json(found.document)))
}

// ─── Put ──────────────────────────────────────────────────────────────────────

/// `PUT /deployments/{market}/{deployment_id}` — body: a deployment document.
///
/// 201 when the document is new, 200 when it replaced one.
pub async fn put_one<S, R>(
  State(state): State<AppState<S, R>>,
  Path((market, deployment_id)): Path<(String, String)>,
  headers: HeaderMap,
  Json(mut deployment): Json<Deployment>,
) -> Result<impl IntoResponse, ApiError>
where
  S: DeploymentRepository,
  R: RosterSource,
{
  if deployment.market != market || deployment.deployment_id != deployment_id {
    return Err(ApiError::BadRequest(format!(
      "body addresses {}/{}, path addresses {market}/{deployment_id}",
      deployment.market, deployment.deployment_id
    )));
  }

  let current = state
    .store
    .find_deployment(&market, &deployment_id)
    .await
    .map_err(ApiError::store)?;
  let current_etag = current.as_ref().map(|v| v.etag.as_str());
  if !precondition_holds(if_match(&headers), current_etag) {
    return Err(ApiError::PreconditionFailed(format!(
      "deployment {market}/{deployment_id} has changed"
    )));
  }

  deployment.detailed_status = deployment.derive_detailed_status();
  // Conditional on the version read above; a patch landing in between is a 412.
  let stored = match current_etag {
    Some(etag) => state.store.replace_deployment(deployment, etag).await,
    None => state.store.put_deployment(deployment).await,
  }
  .map_err(ApiError::store)?;
  tracing::info!(
    market = %market,
    deployment_id = %deployment_id,
    etag = %stored.etag,
    "deployment stored"
  );

  let status = if current.is_some() { StatusCode::OK } else { StatusCode::CREATED };
  Ok((status, [(header::ETAG, stored.etag)], Json(stored.document)))
}
