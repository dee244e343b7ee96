//! The rollout ingest host.
//!
//! Decodes raw bus messages, filters them, runs each through the engine
//! inside a read–compute–write loop against a [`DeploymentRepository`], and
//! serves the resulting documents over HTTP.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/events` | Body: JSON array of raw messages; returns one report per message |
//! | `GET`  | `/deployments/{market}/{deployment_id}` | `ETag` header |
//! | `PUT`  | `/deployments/{market}/{deployment_id}` | Honours `If-Match` |
//! | `GET`  | `/workflows/{id}` | `ETag` header |
//! | `PUT`  | `/workflows/{id}` | Honours `If-Match` |

pub mod deployments;
pub mod error;
pub mod events;
pub mod filter;
pub mod processor;
pub mod roster;
pub mod wire;
pub mod workflows;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  http::{HeaderMap, header},
  routing::{get, post},
};
use rollout_core::{roster::RosterSource, store::DeploymentRepository};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use filter::{EventFilter, FilterConfig};
use processor::{Processor, RetryConfig};
use roster::RosterConfig;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `config.toml` and `ROLLOUT_*`.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub roster:     RosterConfig,
  #[serde(default)]
  pub filter:     FilterConfig,
  #[serde(default)]
  pub retry:      RetryConfig,
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, R> {
  pub store:     Arc<S>,
  pub processor: Arc<Processor<S, R>>,
  pub config:    Arc<ServerConfig>,
}

impl<S, R> AppState<S, R>
where
  S: DeploymentRepository,
  R: RosterSource,
{
  pub fn new(store: Arc<S>, roster: Arc<R>, config: ServerConfig) -> Self {
    let processor = Processor::new(
      store.clone(),
      roster,
      EventFilter::new(config.filter.clone()),
      config.retry.clone(),
    );
    Self { store, processor: Arc::new(processor), config: Arc::new(config) }
  }
}

impl<S, R> Clone for AppState<S, R> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      processor: self.processor.clone(),
      config:    self.config.clone(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the ingest router for `state`.
pub fn router<S, R>(state: AppState<S, R>) -> Router
where
  S: DeploymentRepository + 'static,
  R: RosterSource + 'static,
{
  Router::new()
    .route("/events", post(events::ingest::<S, R>))
    .route(
      "/deployments/{market}/{deployment_id}",
      get(deployments::get_one::<S, R>).put(deployments::put_one::<S, R>),
    )
    .route(
      "/workflows/{id}",
      get(workflows::get_one::<S, R>).put(workflows::put_one::<S, R>),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Conditional requests ─────────────────────────────────────────────────────

/// The raw `If-Match` header, if present and readable.
fn if_match(headers: &HeaderMap) -> Option<&str> {
  headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok())
}

/// Whether an `If-Match` value admits the current ETag (`None` when the
/// document does not exist).
fn precondition_holds(if_match: Option<&str>, current: Option<&str>) -> bool {
  let Some(wanted) = if_match else { return true };
  let Some(current) = current else { return false };
  wanted
    .split(',')
    .map(str::trim)
    .any(|tag| tag == "*" || tag.trim_matches('"') == current.trim_matches('"'))
}
