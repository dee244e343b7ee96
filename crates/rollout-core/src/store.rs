//! The `DeploymentRepository` trait and the versioned-document wrapper.
//!
//! Backends (e.g. `rollout-store-sqlite`) implement the trait; the ingest
//! host depends only on this abstraction. Every write is conditional on the
//! ETag read with the document, which is how concurrent events for the same
//! deployment are serialised.

use std::future::Future;

use serde::Serialize;

use crate::{deployment::Deployment, patch::PatchOp, workflow::Workflow};

/// A document together with the ETag of the version it was read at.
#[derive(Debug, Clone, Serialize)]
pub struct Versioned<T> {
  pub etag:     String,
  #[serde(flatten)]
  pub document: T,
}

/// Errors a repository may raise, classified for the retry loop.
pub trait RepositoryError: std::error::Error + Send + Sync + 'static {
  /// The document changed since it was read; re-read and retry.
  fn is_stale_write(&self) -> bool;

  /// The addressed document does not exist.
  fn is_not_found(&self) -> bool;
}

/// Abstraction over the deployment and workflow document collections.
///
/// All methods return `Send` futures so the trait can be used behind `axum`.
pub trait DeploymentRepository: Send + Sync {
  type Error: RepositoryError;

  // ── Deployments ───────────────────────────────────────────────────────

  /// Look up a deployment by its natural key. `None` if absent.
  fn find_deployment<'a>(
    &'a self,
    market: &'a str,
    deployment_id: &'a str,
  ) -> impl Future<Output = Result<Option<Versioned<Deployment>>, Self::Error>> + Send + 'a;

  /// Insert or wholly replace a deployment document, unconditionally. An
  /// empty `id` keeps the stored document id, or is assigned when new.
  fn put_deployment(
    &self,
    deployment: Deployment,
  ) -> impl Future<Output = Result<Versioned<Deployment>, Self::Error>> + Send + '_;

  /// Wholly replace a deployment document, provided the stored version
  /// still has `etag`. An empty `id` keeps the stored document id.
  ///
  /// Fails with a stale-write error when it does not.
  fn replace_deployment<'a>(
    &'a self,
    deployment: Deployment,
    etag: &'a str,
  ) -> impl Future<Output = Result<Versioned<Deployment>, Self::Error>> + Send + 'a;

  /// Apply `ops` atomically, provided the stored version still has `etag`.
  ///
  /// Fails with a stale-write error when it does not.
  fn patch_deployment<'a>(
    &'a self,
    market: &'a str,
    deployment_id: &'a str,
    etag: &'a str,
    ops: Vec<PatchOp>,
  ) -> impl Future<Output = Result<Versioned<Deployment>, Self::Error>> + Send + 'a;

  // ── Workflows ─────────────────────────────────────────────────────────

  fn find_workflow<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Versioned<Workflow>>, Self::Error>> + Send + 'a;

  fn put_workflow(
    &self,
    workflow: Workflow,
  ) -> impl Future<Output = Result<Versioned<Workflow>, Self::Error>> + Send + '_;

  /// As [`replace_deployment`](Self::replace_deployment), for workflows.
  fn replace_workflow<'a>(
    &'a self,
    workflow: Workflow,
    etag: &'a str,
  ) -> impl Future<Output = Result<Versioned<Workflow>, Self::Error>> + Send + 'a;

  /// As [`patch_deployment`](Self::patch_deployment), for workflows.
  fn patch_workflow<'a>(
    &'a self,
    id: &'a str,
    etag: &'a str,
    ops: Vec<PatchOp>,
  ) -> impl Future<Output = Result<Versioned<Workflow>, Self::Error>> + Send + 'a;
}
