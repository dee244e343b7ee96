//! Handler for `POST /events`.
//!
//! Accepts a batch of raw bus messages and reports what happened to each.
//! A message that fails is reported and never blocks its siblings.

use axum::{Json, extract::State};
use rollout_core::{roster::RosterSource, store::DeploymentRepository};
use serde_json::Value;

use crate::{AppState, processor::MessageReport};

/// `POST /events` — body: `[<message>, ...]`
pub async fn ingest<S, R>(
  State(state): State<AppState<S, R>>,
  Json(messages): Json<Vec<Value>>,
) -> Json<Vec<MessageReport>>
where
  S: DeploymentRepository,
  R: RosterSource,
{
  tracing::debug!(count = messages.len(), "received event batch");
  Json(state.processor.process_batch(messages).await)
}
