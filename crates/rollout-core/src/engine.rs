//! The deployment status engine.
//!
//! [`apply`] folds one decoded [`Event`] into an in-memory [`Deployment`] and
//! returns a [`Transition`]: the field-path patch that reproduces the change
//! on the persisted document, plus the statuses the caller may want to
//! publish. The engine performs no I/O. The one external input it needs, the
//! store's device roster, is fetched by the caller beforehand when
//! [`roster_wanted`] says so.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use crate::aggregate::detailed_status;
use crate::{
  Error, Result,
  deployment::{
    Deployment, DeploymentStore, DeviceStats, DeviceStatus, WorkflowTrigger,
    is_pre_deployment_template,
  },
  event::{Event, EventKind, WorkflowIdUpdate, WorkflowStep},
  patch::{PatchOp, store_field},
  sequencing::EventPath,
  status::{DeploymentStatus, DetailStatus, DownloadStatus, StoreStatus},
};

/// The outcome of applying one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
  /// Patch operations reproducing the change; empty means "no action".
  pub ops:               Vec<PatchOp>,
  /// The store's new status, when it changed.
  pub store_status:      Option<StoreStatus>,
  /// The deployment's new status, when it changed.
  pub deployment_status: Option<DeploymentStatus>,
}

impl Transition {
  pub fn is_noop(&self) -> bool { self.ops.is_empty() }
}

/// Whether the caller should look up the target store's device roster
/// before calling [`apply`].
///
/// True only when the store has no snapshot yet and the event is one at
/// which the roster is initialised. A failed lookup simply means the next
/// such event asks again.
pub fn roster_wanted(deployment: &Deployment, event: &Event) -> bool {
  deployment
    .store(&event.target.store_id)
    .is_some_and(|store| store.device_stats.is_none() && is_roster_point(store, &event.kind))
}

fn is_roster_point(store: &DeploymentStore, kind: &EventKind) -> bool {
  match kind {
    EventKind::WorkflowStep(step) => step.status == DetailStatus::DoDeploySuccess,
    EventKind::PackageDownload(status) => {
      *status == DownloadStatus::Succeeded && !store.status.is_terminal()
    }
    EventKind::DeviceMigration(_) => store.status.accepts_migration(),
    EventKind::DeviceCancellation(_) => true,
    EventKind::DeviceRollback(_)
    | EventKind::UpdateWorkflowId(_)
    | EventKind::RecalculateStatus => false,
  }
}

/// Apply `event` to `deployment`.
///
/// `roster` is the filtered snapshot fetched for the target store, if any;
/// it is only used when the store has none and the event is a roster
/// initialisation point. `now` stamps completion dates.
///
/// Re-applying an event that was already persisted only appends a duplicate
/// device record; statuses and dates are never regressed.
pub fn apply(
  deployment: &mut Deployment,
  event: &Event,
  roster: Option<DeviceStats>,
  now: DateTime<Utc>,
) -> Result<Transition> {
  let index = deployment.store_index(&event.target.store_id).ok_or_else(|| {
    Error::StoreNotFound {
      deployment_id: event.target.deployment_id.clone(),
      store_id:      event.target.store_id.clone(),
    }
  })?;

  let before = Snapshot::of(deployment, index);
  let mut ops = Vec::new();

  let store = &mut deployment.stores[index];
  if store.device_stats.is_none() && is_roster_point(store, &event.kind) {
    store.device_stats = roster;
  }

  match &event.kind {
    EventKind::DeviceMigration(device) => migrate(store, index, device, now, &mut ops)?,
    EventKind::DeviceRollback(device) => roll_back(store, index, device, now, &mut ops)?,
    EventKind::DeviceCancellation(device) => cancel(store, index, device, now, &mut ops)?,
    EventKind::PackageDownload(status) => {
      if !store.status.is_terminal() {
        store.status = status.label();
      }
    }
    EventKind::WorkflowStep(step) => {
      workflow_step(store, index, step, &mut ops)?;
      advance_deployment(deployment, step);
    }
    EventKind::UpdateWorkflowId(update) => update_workflow_id(deployment, index, update),
    EventKind::RecalculateStatus => recalculate(store, now),
  }

  let store_status = deployment.stores[index].status;
  if store_status != before.store_status && store_status.is_terminal() {
    if let Some(status) = deployment.rollup_status() {
      deployment.status = status;
    }
  }

  before.finish(deployment, index, ops)
}

// ─── Device paths ────────────────────────────────────────────────────────────

fn migrate(
  store: &mut DeploymentStore,
  index: usize,
  device: &DeviceStatus,
  now: DateTime<Utc>,
  ops: &mut Vec<PatchOp>,
) -> Result<()> {
  let accepted = store.status.accepts_migration();
  record_device(store, index, device, ops)?;
  if !accepted {
    return Ok(());
  }

  if store.is_first_device_event() {
    store.status = StoreStatus::DeploymentInProgress;
  }
  if store.is_last_device_event() {
    settle(store, EventPath::Migration, now);
  }
  Ok(())
}

fn roll_back(
  store: &mut DeploymentStore,
  index: usize,
  device: &DeviceStatus,
  now: DateTime<Utc>,
  ops: &mut Vec<PatchOp>,
) -> Result<()> {
  let accepted = store.status.accepts_rollback();
  record_device(store, index, device, ops)?;
  if accepted && store.is_last_device_rollback_event() {
    settle(store, EventPath::Rollback, now);
  }
  Ok(())
}

fn cancel(
  store: &mut DeploymentStore,
  index: usize,
  device: &DeviceStatus,
  now: DateTime<Utc>,
  ops: &mut Vec<PatchOp>,
) -> Result<()> {
  record_device(store, index, device, ops)?;
  if !store.status.is_terminal() && store.is_last_device_cancel_event() {
    store.status = StoreStatus::Canceled;
    store.date_completed.get_or_insert(now);
  }
  Ok(())
}

/// Terminalise a fully covered store.
fn settle(store: &mut DeploymentStore, path: EventPath, now: DateTime<Utc>) {
  store.status = if store.all_devices_succeeded(path) {
    StoreStatus::Completed
  } else {
    StoreStatus::Failed
  };
  store.date_completed.get_or_insert(now);
}

fn record_device(
  store: &mut DeploymentStore,
  index: usize,
  device: &DeviceStatus,
  ops: &mut Vec<PatchOp>,
) -> Result<()> {
  store.devices_status.push(device.clone());
  ops.push(append_op(index, "devicesStatus", &store.devices_status)?);
  Ok(())
}

/// Patch for the element just pushed onto `list`: the whole list when it
/// was previously empty (the field may be absent), otherwise an append.
fn append_op<T: Serialize>(index: usize, field: &str, list: &[T]) -> Result<PatchOp> {
  match list {
    [only] => PatchOp::add(store_field(index, field), std::slice::from_ref(only)),
    [.., last] => PatchOp::add(store_field(index, &format!("{field}/-")), last),
    [] => Err(Error::InvalidPatch {
      path:   store_field(index, field),
      reason: "nothing to append".into(),
    }),
  }
}

// ─── Workflow paths ──────────────────────────────────────────────────────────

fn workflow_step(
  store: &mut DeploymentStore,
  index: usize,
  step: &WorkflowStep,
  ops: &mut Vec<PatchOp>,
) -> Result<()> {
  if !store.status.is_terminal() || step.status.reopens_terminal() {
    store.status = step.status.label();
  }

  if step.status.is_dependency_check_result() {
    if let Some(batch) = &step.dependency_check {
      store.dependency_check_details.push(batch.clone());
      ops.push(append_op(index, "dependencyCheckDetails", &store.dependency_check_details)?);
    }
  }
  Ok(())
}

/// Deployment-level effect of a workflow step: the first step of a real
/// deployment workflow starts it; otherwise the stores may have settled it.
fn advance_deployment(deployment: &mut Deployment, step: &WorkflowStep) {
  if deployment.status == DeploymentStatus::Scheduled
    && !is_pre_deployment_template(step.workflow_template.as_deref())
  {
    deployment.status = DeploymentStatus::InProgress;
  } else if let Some(status) = deployment.rollup_status() {
    deployment.status = status;
  }
}

fn update_workflow_id(deployment: &mut Deployment, index: usize, update: &WorkflowIdUpdate) {
  deployment.is_record_created = false;

  let template = update.workflow_template.as_deref();
  let trigger = WorkflowTrigger::for_template(template);
  if deployment.workflows_created != trigger {
    deployment.workflows_created = trigger;
    deployment.current_workflow_template = update.selected_workflow_template.clone();
  }

  deployment.stores[index].workflow_id = if is_pre_deployment_template(template) {
    None
  } else {
    update.workflow_id.clone()
  };
}

/// Self-healing: a store whose devices all succeeded is Completed, whatever
/// it currently says.
fn recalculate(store: &mut DeploymentStore, now: DateTime<Utc>) {
  if !store.devices_status.is_empty()
    && store.all_devices_succeeded(EventPath::Migration)
    && store.status != StoreStatus::Completed
  {
    store.status = StoreStatus::Completed;
    store.date_completed.get_or_insert(now);
  }
}

// ─── Diffing ─────────────────────────────────────────────────────────────────

/// The scalar fields an event may change, captured before applying it.
struct Snapshot {
  status:                    DeploymentStatus,
  detailed_status:           String,
  current_workflow_template: Option<String>,
  is_record_created:         bool,
  workflows_created:         WorkflowTrigger,
  store_status:              StoreStatus,
  date_completed:            Option<DateTime<Utc>>,
  workflow_id:               Option<String>,
  had_device_stats:          bool,
}

impl Snapshot {
  fn of(deployment: &Deployment, index: usize) -> Self {
    let store = &deployment.stores[index];
    Self {
      status:                    deployment.status,
      detailed_status:           deployment.detailed_status.clone(),
      current_workflow_template: deployment.current_workflow_template.clone(),
      is_record_created:         deployment.is_record_created,
      workflows_created:         deployment.workflows_created,
      store_status:              store.status,
      date_completed:            store.date_completed,
      workflow_id:               store.workflow_id.clone(),
      had_device_stats:          store.device_stats.is_some(),
    }
  }

  /// Refresh the detailed status and emit `Set`s for every changed field
  /// after the appends already in `ops`.
  fn finish(
    self,
    deployment: &mut Deployment,
    index: usize,
    mut ops: Vec<PatchOp>,
  ) -> Result<Transition> {
    deployment.detailed_status = deployment.derive_detailed_status();
    let store = &deployment.stores[index];

    if !self.had_device_stats {
      if let Some(stats) = &store.device_stats {
        ops.push(PatchOp::set(store_field(index, "deviceStats"), stats)?);
      }
    }
    let store_status = (store.status != self.store_status).then_some(store.status);
    if store_status.is_some() {
      ops.push(PatchOp::set(store_field(index, "status"), store.status)?);
    }
    if store.date_completed != self.date_completed {
      ops.push(PatchOp::set(store_field(index, "dateCompleted"), store.date_completed)?);
    }
    if store.workflow_id != self.workflow_id {
      ops.push(PatchOp::set(store_field(index, "workflowId"), &store.workflow_id)?);
    }
    if deployment.detailed_status != self.detailed_status {
      ops.push(PatchOp::set("/detailedStatus", &deployment.detailed_status)?);
    }
    if deployment.is_record_created != self.is_record_created {
      ops.push(PatchOp::set("/isRecordCreated", deployment.is_record_created)?);
    }
    if deployment.workflows_created != self.workflows_created {
      ops.push(PatchOp::set("/workflowsCreated", deployment.workflows_created)?);
    }
    if deployment.current_workflow_template != self.current_workflow_template {
      ops.push(PatchOp::set(
        "/currentWorkflowTemplate",
        &deployment.current_workflow_template,
      )?);
    }
    let deployment_status = (deployment.status != self.status).then_some(deployment.status);
    if deployment_status.is_some() {
      ops.push(PatchOp::set("/status", deployment.status)?);
    }

    Ok(Transition { ops, store_status, deployment_status })
  }
}
