//! The read–compute–write loop around the engine.
//!
//! For every decoded event the processor reads the target document, runs
//! the engine, and writes the resulting patch conditionally on the ETag it
//! read. A stale write restarts the whole cycle after a backoff. Each
//! message in a batch is handled independently: one failure is reported
//! and processing moves on.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use rollout_core::{
  deployment::{DeviceStats, DeploymentStore},
  engine,
  event::{Event, StoreRef},
  roster::RosterSource,
  status::{DeploymentStatus, StoreStatus},
  store::{DeploymentRepository, Versioned},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
  error::ProcessError,
  filter::EventFilter,
  wire::{self, Inbound},
};

/// Retry policy for stale writes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_retries:      u32,
  /// Base delay; attempt `n` waits `n * retry_backoff_ms`.
  pub retry_backoff_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self { Self { max_retries: 3, retry_backoff_ms: 100 } }
}

impl RetryConfig {
  /// Delay before retry `attempt` (1-based), saturating at `u64::MAX` ms.
  pub fn delay(&self, attempt: u32) -> Duration {
    Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
  }
}

/// What happened to one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
  /// The document was patched.
  Applied {
    #[serde(skip_serializing_if = "Option::is_none")]
    store_status:      Option<StoreStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployment_status: Option<DeploymentStatus>,
  },
  /// A workflow step was marked started.
  StepStarted { workflow_id: String, step: String },
  /// The event was valid but changed nothing.
  NoAction,
  /// The filter discarded the message.
  Ignored,
  /// The event can never succeed (malformed, or targets nothing).
  Rejected { error: String },
  /// Processing failed; redelivery may succeed.
  Failed { error: String },
}

/// Per-message report for a batch.
#[derive(Debug, Clone, Serialize)]
pub struct MessageReport {
  pub index:    usize,
  pub outcomes: Vec<Outcome>,
}

pub struct Processor<S, R> {
  store:  Arc<S>,
  roster: Arc<R>,
  filter: EventFilter,
  retry:  RetryConfig,
}

impl<S, R> Processor<S, R>
where
  S: DeploymentRepository,
  R: RosterSource,
{
  pub fn new(store: Arc<S>, roster: Arc<R>, filter: EventFilter, retry: RetryConfig) -> Self {
    Self { store, roster, filter, retry }
  }

  /// Process a batch of raw messages in order.
  pub async fn process_batch(&self, messages: Vec<Value>) -> Vec<MessageReport> {
    let mut reports = Vec::with_capacity(messages.len());
    for (index, raw) in messages.into_iter().enumerate() {
      let outcomes = self.process_message(raw).await;
      reports.push(MessageReport { index, outcomes });
    }
    reports
  }

  async fn process_message(&self, raw: Value) -> Vec<Outcome> {
    let inbound = match wire::decode(raw, &self.filter) {
      Ok(inbound) => inbound,
      Err(e) => {
        warn!(error = %e, "rejecting undecodable message");
        return vec![Outcome::Rejected { error: e.to_string() }];
      }
    };
    if inbound.is_empty() {
      debug!("message filtered out");
      return vec![Outcome::Ignored];
    }

    let mut outcomes = Vec::with_capacity(inbound.len());
    for item in inbound {
      let result = match &item {
        Inbound::Deployment(event) => self.apply_event(event).await,
        Inbound::StepStart { workflow_id, step } => self.start_step(workflow_id, step).await,
      };
      outcomes.push(match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_rejection() => {
          warn!(error = %e, "event rejected");
          Outcome::Rejected { error: e.to_string() }
        }
        Err(e) => {
          tracing::error!(error = %e, "event processing failed");
          Outcome::Failed { error: e.to_string() }
        }
      });
    }
    outcomes
  }

  /// Apply one deployment event, retrying on stale writes.
  pub async fn apply_event(&self, event: &Event) -> Result<Outcome, ProcessError> {
    let target = &event.target;
    let outcome = self.with_retry(|| self.try_apply(event)).await?;
    match &outcome {
      Outcome::Applied { store_status, deployment_status } => info!(
        market = %target.market,
        deployment_id = %target.deployment_id,
        store_id = %target.store_id,
        device_id = event.kind.device().map(|d| d.device_id.as_str()),
        kind = event.kind.name(),
        store_status = store_status.map(StoreStatus::as_label),
        deployment_status = ?deployment_status,
        "event applied"
      ),
      _ => debug!(
        market = %target.market,
        deployment_id = %target.deployment_id,
        store_id = %target.store_id,
        kind = event.kind.name(),
        "no action"
      ),
    }
    Ok(outcome)
  }

  async fn try_apply(&self, event: &Event) -> Result<Outcome, ProcessError> {
    let target = &event.target;
    let Versioned { etag, document: mut deployment } = self
      .store
      .find_deployment(&target.market, &target.deployment_id)
      .await
      .map_err(ProcessError::from_repository)?
      .ok_or_else(|| rollout_core::Error::DeploymentNotFound {
        market:        target.market.clone(),
        deployment_id: target.deployment_id.clone(),
      })?;

    let roster = if engine::roster_wanted(&deployment, event) {
      match deployment.store(&target.store_id) {
        Some(store) => self.lookup_roster(target, store).await,
        None => None,
      }
    } else {
      None
    };

    let transition = engine::apply(&mut deployment, event, roster, Utc::now())?;
    if transition.is_noop() {
      return Ok(Outcome::NoAction);
    }

    self
      .store
      .patch_deployment(&target.market, &target.deployment_id, &etag, transition.ops)
      .await
      .map_err(ProcessError::from_repository)?;

    Ok(Outcome::Applied {
      store_status:      transition.store_status,
      deployment_status: transition.deployment_status,
    })
  }

  /// Fetch and filter the roster for `store`. Failures leave the snapshot
  /// unset so a later event tries again.
  async fn lookup_roster(&self, target: &StoreRef, store: &DeploymentStore) -> Option<DeviceStats> {
    let unavailable = |reason: String| {
      let e = rollout_core::Error::RosterUnavailable {
        store_id: target.store_id.clone(),
        reason,
      };
      warn!(
        market = %target.market,
        deployment_id = %target.deployment_id,
        error = %e,
        "continuing without a device roster"
      );
    };

    match self.roster.store_devices(&target.market, &target.store_id).await {
      Ok(devices) => {
        let snapshot = store.roster_snapshot(devices, Utc::now());
        if snapshot.is_none() {
          unavailable("no eligible devices".into());
        }
        snapshot
      }
      Err(e) => {
        unavailable(e.to_string());
        None
      }
    }
  }

  /// Mark a workflow step as started, retrying on stale writes.
  pub async fn start_step(&self, workflow_id: &str, step: &str) -> Result<Outcome, ProcessError> {
    self
      .with_retry(move || async move {
        let Versioned { etag, document: mut workflow } = self
          .store
          .find_workflow(workflow_id)
          .await
          .map_err(ProcessError::from_repository)?
          .ok_or_else(|| rollout_core::Error::WorkflowNotFound(workflow_id.to_owned()))?;

        let ops = workflow.start_step(step, Utc::now())?;
        self
          .store
          .patch_workflow(workflow_id, &etag, ops)
          .await
          .map_err(ProcessError::from_repository)?;

        info!(workflow_id, step, "workflow step started");
        Ok(Outcome::StepStarted {
          workflow_id: workflow_id.to_owned(),
          step:        step.to_owned(),
        })
      })
      .await
  }

  async fn with_retry<F, Fut>(&self, mut attempt_once: F) -> Result<Outcome, ProcessError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Outcome, ProcessError>>,
  {
    let mut attempt = 0;
    loop {
      match attempt_once().await {
        Err(ProcessError::Stale(e)) if attempt < self.retry.max_retries => {
          attempt += 1;
          let delay = self.retry.delay(attempt);
          warn!(attempt, error = %e, ?delay, "stale write; retrying");
          tokio::time::sleep(delay).await;
        }
        other => return other,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::HashMap,
    sync::atomic::{AtomicU32, Ordering},
  };

  use rollout_core::{
    deployment::{Component, Deployment},
    patch::PatchOp,
    roster::RosterDevice,
    workflow::{StepState, Workflow},
  };
  use rollout_store_sqlite::SqliteStore;
  use serde_json::json;

  use super::*;

  // ── Fakes ─────────────────────────────────────────────────────────────────

  #[derive(Debug, thiserror::Error)]
  #[error("roster service down")]
  struct Down;

  /// Rosters keyed by store id; missing stores fail the lookup.
  #[derive(Default)]
  struct FakeRoster {
    stores: HashMap<String, Vec<RosterDevice>>,
    calls:  AtomicU32,
  }

  impl FakeRoster {
    fn with(store_id: &str, devices: &[(&str, &str)]) -> Self {
      let mut roster = Self::default();
      roster.stores.insert(
        store_id.into(),
        devices.iter().map(|(n, t)| RosterDevice::new(*n, *t)).collect(),
      );
      roster
    }
  }

  impl RosterSource for FakeRoster {
    type Error = Down;

    async fn store_devices(&self, _market: &str, store_id: &str) -> Result<Vec<RosterDevice>, Down> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.stores.get(store_id).cloned().ok_or(Down)
    }
  }

  /// Delegates to SQLite but reports the first `stale` patches as stale.
  struct Flaky {
    inner: SqliteStore,
    stale: AtomicU32,
  }

  impl DeploymentRepository for Flaky {
    type Error = rollout_store_sqlite::Error;

    async fn find_deployment(
      &self,
      market: &str,
      deployment_id: &str,
    ) -> Result<Option<Versioned<Deployment>>, Self::Error> {
      self.inner.find_deployment(market, deployment_id).await
    }

    async fn put_deployment(&self, d: Deployment) -> Result<Versioned<Deployment>, Self::Error> {
      self.inner.put_deployment(d).await
    }

    async fn replace_deployment(
      &self,
      d: Deployment,
      etag: &str,
    ) -> Result<Versioned<Deployment>, Self::Error> {
      self.inner.replace_deployment(d, etag).await
    }

    async fn patch_deployment(
      &self,
      market: &str,
      deployment_id: &str,
      etag: &str,
      ops: Vec<PatchOp>,
    ) -> Result<Versioned<Deployment>, Self::Error> {
      if self
        .stale
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
      {
        return Err(rollout_store_sqlite::Error::StaleWrite(deployment_id.into()));
      }
      self.inner.patch_deployment(market, deployment_id, etag, ops).await
    }

    async fn find_workflow(&self, id: &str) -> Result<Option<Versioned<Workflow>>, Self::Error> {
      self.inner.find_workflow(id).await
    }

    async fn put_workflow(&self, w: Workflow) -> Result<Versioned<Workflow>, Self::Error> {
      self.inner.put_workflow(w).await
    }

    async fn replace_workflow(
      &self,
      w: Workflow,
      etag: &str,
    ) -> Result<Versioned<Workflow>, Self::Error> {
      self.inner.replace_workflow(w, etag).await
    }

    async fn patch_workflow(
      &self,
      id: &str,
      etag: &str,
      ops: Vec<PatchOp>,
    ) -> Result<Versioned<Workflow>, Self::Error> {
      self.inner.patch_workflow(id, etag, ops).await
    }
  }

  // ── Helpers ───────────────────────────────────────────────────────────────

  fn deployment(status: StoreStatus) -> Deployment {
    Deployment::scheduled(
      "doc-1",
      "US",
      "D100",
      vec![
        DeploymentStore::new("US001", status).with_components(vec![Component {
          software: "POS".into(),
          version:  Some("24.3".into()),
        }]),
      ],
    )
  }

  fn retry() -> RetryConfig { RetryConfig { max_retries: 3, retry_backoff_ms: 1 } }

  async fn processor(
    d: Deployment,
    roster: FakeRoster,
    stale: u32,
  ) -> Processor<Flaky, FakeRoster> {
    let inner = SqliteStore::open_in_memory().await.unwrap();
    inner.put_deployment(d).await.unwrap();
    let store = Flaky { inner, stale: AtomicU32::new(stale) };
    Processor::new(Arc::new(store), Arc::new(roster), EventFilter::default(), retry())
  }

  fn device(id: &str, ts: &str, status: &str) -> Value {
    json!({
      "DeviceId": id,
      "Market": "US",
      "StoreId": "US001",
      "DeploymentId": "D100",
      "Timestamp": ts,
      "Event": { "EventType": "PackageApplication", "EventStatus": status }
    })
  }

  async fn stored(p: &Processor<Flaky, FakeRoster>) -> Deployment {
    p.store.find_deployment("US", "D100").await.unwrap().unwrap().document
  }

  // ── Tests ─────────────────────────────────────────────────────────────────

  #[test]
  fn retry_delay_grows_linearly_and_saturates() {
    let retry = RetryConfig { max_retries: 3, retry_backoff_ms: 100 };
    assert_eq!(retry.delay(1), Duration::from_millis(100));
    assert_eq!(retry.delay(3), Duration::from_millis(300));

    let huge = RetryConfig { max_retries: 3, retry_backoff_ms: u64::MAX };
    assert_eq!(huge.delay(2), Duration::from_millis(u64::MAX));
  }

  #[tokio::test]
  async fn batch_runs_store_to_terminal_status() {
    let roster = FakeRoster::with(
      "US001",
      &[("POS01", "POS"), ("POS02", "POS"), ("POS03", "POS"), ("RHS01", "RHS")],
    );
    let p = processor(deployment(StoreStatus::RepositoryReady), roster, 0).await;

    let reports = p
      .process_batch(vec![
        device("POS01", "2024-03-01T10:00:00Z", "Succeeded"),
        device("POS02", "2024-03-01T10:01:00Z", "Succeeded"),
        device("POS03", "2024-03-01T10:02:00Z", "Failed"),
      ])
      .await;

    assert_eq!(reports.len(), 3);
    assert_eq!(
      reports[0].outcomes,
      vec![Outcome::Applied {
        store_status:      Some(StoreStatus::DeploymentInProgress),
        deployment_status: None,
      }]
    );
    assert_eq!(reports[1].outcomes, vec![Outcome::Applied {
      store_status:      None,
      deployment_status: None,
    }]);
    assert_eq!(
      reports[2].outcomes,
      vec![Outcome::Applied {
        store_status:      Some(StoreStatus::Failed),
        deployment_status: Some(DeploymentStatus::Completed),
      }]
    );

    let d = stored(&p).await;
    assert_eq!(d.detailed_status, "1/1 Failed");
    assert_eq!(d.status, DeploymentStatus::Completed);
    let stats = d.stores[0].device_stats.as_ref().unwrap();
    assert_eq!(stats.devices, vec!["POS01", "POS02", "POS03"]);
    assert_eq!(p.roster.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn one_bad_message_does_not_block_the_batch() {
    let roster = FakeRoster::with("US001", &[("POS01", "POS")]);
    let p = processor(deployment(StoreStatus::RepositoryReady), roster, 0).await;

    let mut wrong_deployment = device("POS01", "2024-03-01T10:00:00Z", "Succeeded");
    wrong_deployment["DeploymentId"] = json!("D999");

    let reports = p
      .process_batch(vec![
        json!({ "nonsense": true }),
        wrong_deployment,
        json!({ "status": "Heartbeat", "message": "storeId:US001" }),
        device("POS01", "2024-03-01T10:00:00Z", "Succeeded"),
      ])
      .await;

    assert!(matches!(reports[0].outcomes[0], Outcome::Rejected { .. }));
    assert!(matches!(reports[1].outcomes[0], Outcome::Rejected { .. }));
    assert_eq!(reports[2].outcomes, vec![Outcome::Ignored]);
    assert!(matches!(
      reports[3].outcomes[0],
      Outcome::Applied { store_status: Some(StoreStatus::Completed), .. }
    ));
  }

  #[tokio::test]
  async fn roster_failure_is_retried_on_next_event() {
    let p = processor(deployment(StoreStatus::RepositoryReady), FakeRoster::default(), 0).await;

    p.process_batch(vec![device("POS01", "2024-03-01T10:00:00Z", "Succeeded")])
      .await;
    p.process_batch(vec![device("POS02", "2024-03-01T10:01:00Z", "Succeeded")])
      .await;

    let d = stored(&p).await;
    assert!(d.stores[0].device_stats.is_none());
    assert_eq!(d.stores[0].status, StoreStatus::DeploymentInProgress);
    assert_eq!(d.stores[0].devices_status.len(), 2);
    assert_eq!(p.roster.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn stale_writes_are_retried() {
    let roster = FakeRoster::with("US001", &[("POS01", "POS")]);
    let p = processor(deployment(StoreStatus::RepositoryReady), roster, 2).await;

    let reports = p
      .process_batch(vec![device("POS01", "2024-03-01T10:00:00Z", "Succeeded")])
      .await;
    assert!(matches!(reports[0].outcomes[0], Outcome::Applied { .. }));

    let d = stored(&p).await;
    assert_eq!(d.stores[0].devices_status.len(), 1);
    assert_eq!(d.stores[0].status, StoreStatus::Completed);
  }

  #[tokio::test]
  async fn exhausted_retries_fail_the_event() {
    let roster = FakeRoster::with("US001", &[("POS01", "POS")]);
    let p = processor(deployment(StoreStatus::RepositoryReady), roster, 10).await;

    let reports = p
      .process_batch(vec![device("POS01", "2024-03-01T10:00:00Z", "Succeeded")])
      .await;
    assert!(matches!(reports[0].outcomes[0], Outcome::Failed { .. }));
    assert!(stored(&p).await.stores[0].devices_status.is_empty());
  }

  #[tokio::test]
  async fn noop_events_write_nothing() {
    let p = processor(deployment(StoreStatus::Failed), FakeRoster::default(), 0).await;
    let before = p.store.find_deployment("US", "D100").await.unwrap().unwrap();

    let reports = p
      .process_batch(vec![json!({
        "DeviceId": "POS01",
        "StoreId": "US001",
        "DeploymentId": "D100",
        "Timestamp": "2024-03-01T10:00:00Z",
        "Event": { "EventType": "PackageDownload", "EventStatus": "Started" }
      })])
      .await;
    assert_eq!(reports[0].outcomes, vec![Outcome::NoAction]);

    let after = p.store.find_deployment("US", "D100").await.unwrap().unwrap();
    assert_eq!(before.etag, after.etag);
  }

  #[tokio::test]
  async fn step_start_patches_workflow() {
    let p = processor(deployment(StoreStatus::RepositoryReady), FakeRoster::default(), 0).await;
    let workflow: Workflow = serde_json::from_value(json!({
      "id": "wf-1",
      "workflowTemplate": "Deployment",
      "unstructuredData": { "storeId": "US001", "status": "EventSendPending" },
      "workflowSystems": [{ "name": "DoDeploy", "order": 1, "state": "Pending" }]
    }))
    .unwrap();
    p.store.put_workflow(workflow).await.unwrap();

    let reports = p
      .process_batch(vec![
        json!({ "status": "StartWorkflowStep", "message": "id:wf-1,workflowName:DoDeploy" }),
        json!({ "status": "StartWorkflowStep", "message": "id:wf-1,workflowName:Transport" }),
      ])
      .await;
    assert_eq!(
      reports[0].outcomes,
      vec![Outcome::StepStarted { workflow_id: "wf-1".into(), step: "DoDeploy".into() }]
    );
    assert!(matches!(reports[1].outcomes[0], Outcome::Rejected { .. }));

    let wf = p.store.find_workflow("wf-1").await.unwrap().unwrap().document;
    assert_eq!(wf.workflow_systems[0].state, Some(StepState::Started));
    assert!(wf.workflow_systems[0].workflow_start_date.is_some());
  }

  #[tokio::test]
  async fn workflow_step_starts_deployment_and_snapshots_roster() {
    let roster = FakeRoster::with("US001", &[("POS01", "POS"), ("CSO01", "CSO")]);
    let p = processor(deployment(StoreStatus::DependencyCheckSuccess), roster, 0).await;

    let reports = p
      .process_batch(vec![json!({
        "status": "DoDeploySuccess",
        "message": "deploymentId:D100,storeId:US001,workflowTemplate:Deployment"
      })])
      .await;
    assert_eq!(
      reports[0].outcomes,
      vec![Outcome::Applied {
        store_status:      Some(StoreStatus::RepositoryReady),
        deployment_status: Some(DeploymentStatus::InProgress),
      }]
    );
    let d = stored(&p).await;
    assert_eq!(d.stores[0].device_stats.as_ref().unwrap().devices.len(), 2);
  }
}
