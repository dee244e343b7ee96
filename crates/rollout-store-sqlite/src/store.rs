//! [`SqliteStore`]: the SQLite implementation of [`DeploymentRepository`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use rollout_core::{
  deployment::Deployment,
  patch::PatchOp,
  store::{DeploymentRepository, Versioned},
  workflow::Workflow,
};

use crate::{
  Error, Result,
  document::{Encoded, decode, encode, patched},
  schema::SCHEMA,
};

/// A stored row: JSON text and its ETag.
type Row = (String, String);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A rollout document store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn deployment_row(&self, market: &str, deployment_id: &str) -> Result<Option<Row>> {
    let market = market.to_owned();
    let deployment_id = deployment_id.to_owned();

    let row = self
      .conn
      .call(move |conn| {
        let row = conn
          .query_row(
            "SELECT doc, etag FROM deployments WHERE market = ?1 AND deployment_id = ?2",
            rusqlite::params![market, deployment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;
        Ok(row)
      })
      .await?;
    Ok(row)
  }

  async fn stored_deployment_id(&self, market: &str, deployment_id: &str) -> Result<Option<String>> {
    let market = market.to_owned();
    let deployment_id = deployment_id.to_owned();

    let id = self
      .conn
      .call(move |conn| {
        let id = conn
          .query_row(
            "SELECT id FROM deployments WHERE market = ?1 AND deployment_id = ?2",
            rusqlite::params![market, deployment_id],
            |r| r.get(0),
          )
          .optional()?;
        Ok(id)
      })
      .await?;
    Ok(id)
  }

  async fn workflow_row(&self, id: &str) -> Result<Option<Row>> {
    let id = id.to_owned();

    let row = self
      .conn
      .call(move |conn| {
        let row = conn
          .query_row(
            "SELECT doc, etag FROM workflows WHERE id = ?1",
            rusqlite::params![id],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;
        Ok(row)
      })
      .await?;
    Ok(row)
  }
}

// ─── DeploymentRepository impl ───────────────────────────────────────────────

impl DeploymentRepository for SqliteStore {
  type Error = Error;

  // ── Deployments ───────────────────────────────────────────────────────────

  async fn find_deployment(
    &self,
    market: &str,
    deployment_id: &str,
  ) -> Result<Option<Versioned<Deployment>>> {
    self
      .deployment_row(market, deployment_id)
      .await?
      .map(|(doc, etag)| decode(&doc, etag))
      .transpose()
  }

  async fn put_deployment(&self, mut deployment: Deployment) -> Result<Versioned<Deployment>> {
    if deployment.id.is_empty() {
      deployment.id = self
        .stored_deployment_id(&deployment.market, &deployment.deployment_id)
        .await?
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    }
    let Encoded { doc, etag } = encode(&deployment)?;

    let market        = deployment.market.clone();
    let deployment_id = deployment.deployment_id.clone();
    let id            = deployment.id.clone();
    let etag_str      = etag.clone();
    let at_str        = Utc::now().to_rfc3339();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO deployments (market, deployment_id, id, doc, etag, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT (market, deployment_id) DO UPDATE SET
             id = excluded.id,
             doc = excluded.doc,
             etag = excluded.etag,
             updated_at = excluded.updated_at",
          rusqlite::params![market, deployment_id, id, doc, etag_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(Versioned { etag, document: deployment })
  }

  async fn replace_deployment(
    &self,
    mut deployment: Deployment,
    etag: &str,
  ) -> Result<Versioned<Deployment>> {
    let key = format!("{}/{}", deployment.market, deployment.deployment_id);
    let stored_id = self
      .stored_deployment_id(&deployment.market, &deployment.deployment_id)
      .await?
      .ok_or_else(|| Error::DeploymentNotFound {
        market:        deployment.market.clone(),
        deployment_id: deployment.deployment_id.clone(),
      })?;
    if deployment.id.is_empty() {
      deployment.id = stored_id;
    }
    let Encoded { doc, etag: new_etag } = encode(&deployment)?;

    let market        = deployment.market.clone();
    let deployment_id = deployment.deployment_id.clone();
    let id            = deployment.id.clone();
    let expected      = etag.to_owned();
    let etag_str      = new_etag.clone();
    let at_str        = Utc::now().to_rfc3339();

    let changed = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE deployments SET id = ?1, doc = ?2, etag = ?3, updated_at = ?4
           WHERE market = ?5 AND deployment_id = ?6 AND etag = ?7",
          rusqlite::params![id, doc, etag_str, at_str, market, deployment_id, expected],
        )?;
        Ok(changed)
      })
      .await?;

    if changed == 0 {
      tracing::debug!(key = %key, "deployment modified before conditional replace");
      return Err(Error::StaleWrite(key));
    }
    Ok(Versioned { etag: new_etag, document: deployment })
  }

  async fn patch_deployment(
    &self,
    market: &str,
    deployment_id: &str,
    etag: &str,
    ops: Vec<PatchOp>,
  ) -> Result<Versioned<Deployment>> {
    let (doc, current) = self
      .deployment_row(market, deployment_id)
      .await?
      .ok_or_else(|| Error::DeploymentNotFound {
        market:        market.to_owned(),
        deployment_id: deployment_id.to_owned(),
      })?;
    if current != etag {
      tracing::debug!(market, deployment_id, "deployment etag mismatch before patch");
      return Err(Error::StaleWrite(format!("{market}/{deployment_id}")));
    }

    let (document, encoded): (Deployment, _) = patched(&doc, &ops)?;

    let key           = format!("{market}/{deployment_id}");
    let market        = market.to_owned();
    let deployment_id = deployment_id.to_owned();
    let expected      = etag.to_owned();
    let new_doc       = encoded.doc;
    let new_etag      = encoded.etag.clone();
    let at_str        = Utc::now().to_rfc3339();

    let changed = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE deployments SET doc = ?1, etag = ?2, updated_at = ?3
           WHERE market = ?4 AND deployment_id = ?5 AND etag = ?6",
          rusqlite::params![new_doc, new_etag, at_str, market, deployment_id, expected],
        )?;
        Ok(changed)
      })
      .await?;

    if changed == 0 {
      tracing::debug!(key = %key, "deployment modified between read and conditional update");
      return Err(Error::StaleWrite(key));
    }
    Ok(Versioned { etag: encoded.etag, document })
  }

  // ── Workflows ─────────────────────────────────────────────────────────────

  async fn find_workflow(&self, id: &str) -> Result<Option<Versioned<Workflow>>> {
    self
      .workflow_row(id)
      .await?
      .map(|(doc, etag)| decode(&doc, etag))
      .transpose()
  }

  async fn put_workflow(&self, mut workflow: Workflow) -> Result<Versioned<Workflow>> {
    if workflow.id.is_empty() {
      workflow.id = Uuid::new_v4().to_string();
    }
    let Encoded { doc, etag } = encode(&workflow)?;

    let id       = workflow.id.clone();
    let template = workflow.workflow_template.clone();
    let etag_str = etag.clone();
    let at_str   = Utc::now().to_rfc3339();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO workflows (id, workflow_template, doc, etag, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (id) DO UPDATE SET
             workflow_template = excluded.workflow_template,
             doc = excluded.doc,
             etag = excluded.etag,
             updated_at = excluded.updated_at",
          rusqlite::params![id, template, doc, etag_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(Versioned { etag, document: workflow })
  }

  async fn replace_workflow(&self, workflow: Workflow, etag: &str) -> Result<Versioned<Workflow>> {
    let Encoded { doc, etag: new_etag } = encode(&workflow)?;

    let id       = workflow.id.clone();
    let template = workflow.workflow_template.clone();
    let expected = etag.to_owned();
    let etag_str = new_etag.clone();
    let at_str   = Utc::now().to_rfc3339();

    let changed = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE workflows SET workflow_template = ?1, doc = ?2, etag = ?3, updated_at = ?4
           WHERE id = ?5 AND etag = ?6",
          rusqlite::params![template, doc, etag_str, at_str, id, expected],
        )?;
        Ok(changed)
      })
      .await?;

    if changed == 0 {
      if self.workflow_row(&workflow.id).await?.is_none() {
        return Err(Error::WorkflowNotFound(workflow.id));
      }
      tracing::debug!(id = %workflow.id, "workflow modified before conditional replace");
      return Err(Error::StaleWrite(workflow.id));
    }
    Ok(Versioned { etag: new_etag, document: workflow })
  }

  async fn patch_workflow(
    &self,
    id: &str,
    etag: &str,
    ops: Vec<PatchOp>,
  ) -> Result<Versioned<Workflow>> {
    let (doc, current) = self
      .workflow_row(id)
      .await?
      .ok_or_else(|| Error::WorkflowNotFound(id.to_owned()))?;
    if current != etag {
      return Err(Error::StaleWrite(id.to_owned()));
    }

    let (document, encoded): (Workflow, _) = patched(&doc, &ops)?;

    let id_str   = id.to_owned();
    let expected = etag.to_owned();
    let new_doc  = encoded.doc;
    let new_etag = encoded.etag.clone();
    let at_str   = Utc::now().to_rfc3339();

    let changed = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE workflows SET doc = ?1, etag = ?2, updated_at = ?3
           WHERE id = ?4 AND etag = ?5",
          rusqlite::params![new_doc, new_etag, at_str, id_str, expected],
        )?;
        Ok(changed)
      })
      .await?;

    if changed == 0 {
      return Err(Error::StaleWrite(id.to_owned()));
    }
    Ok(Versioned { etag: encoded.etag, document })
  }
}
